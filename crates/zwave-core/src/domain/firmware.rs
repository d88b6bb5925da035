//! Firmware update payloads, progress and results.

use serde::{Deserialize, Serialize};

/// One firmware image to transfer to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareFile {
    pub data: Vec<u8>,
    pub file_format: Option<String>,
    pub target: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareUpdateStatus {
    ErrorTimeout,
    ErrorChecksum,
    ErrorTransmissionFailed,
    ErrorInvalidManufacturerId,
    ErrorAborted,
    ErrorNotUpgradable,
    ErrorInsufficientMemory,
    OkWaitingForActivation,
    OkNoRestart,
    OkRestartPending,
}

impl FirmwareUpdateStatus {
    pub fn is_ok(self) -> bool {
        matches!(
            self,
            FirmwareUpdateStatus::OkWaitingForActivation
                | FirmwareUpdateStatus::OkNoRestart
                | FirmwareUpdateStatus::OkRestartPending
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareUpdateResult {
    pub status: FirmwareUpdateStatus,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_time: Option<u32>,
    pub reinterview: bool,
}

impl FirmwareUpdateResult {
    /// Builds a result whose `success` flag follows the status.
    pub fn from_status(status: FirmwareUpdateStatus) -> Self {
        Self {
            status,
            success: status.is_ok(),
            wait_time: None,
            reinterview: status == FirmwareUpdateStatus::OkRestartPending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareUpdateProgress {
    pub current_file: u32,
    pub total_files: u32,
    pub sent_fragments: u32,
    pub total_fragments: u32,
    /// Overall progress in percent.
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareUpdateCapabilities {
    pub firmware_upgradable: bool,
    #[serde(default)]
    pub firmware_targets: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continues_to_function: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_activation: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_from_ok_status_is_success() {
        let result = FirmwareUpdateResult::from_status(FirmwareUpdateStatus::OkNoRestart);
        assert!(result.success);
        assert!(!result.reinterview);
    }

    #[test]
    fn test_result_from_error_status_is_failure() {
        let result = FirmwareUpdateResult::from_status(FirmwareUpdateStatus::ErrorChecksum);
        assert!(!result.success);
    }

    #[test]
    fn test_restart_pending_requests_reinterview() {
        let result = FirmwareUpdateResult::from_status(FirmwareUpdateStatus::OkRestartPending);
        assert!(result.success);
        assert!(result.reinterview);
    }
}
