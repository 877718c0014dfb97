//! Poll budgets and settle delays.
//!
//! Defaults reproduce the timings the chips are characterised with. Every
//! value can be overridden from the session config file.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::poll::retry_with_interval;
use crate::error::Result;

/// A poll loop: check every `interval_ms` until `budget_ms` is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitBudget {
    pub budget_ms: u64,
    pub interval_ms: u64,
}

impl WaitBudget {
    pub const fn new(budget_ms: u64, interval_ms: u64) -> Self {
        Self {
            budget_ms,
            interval_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Number of checks the budget allows; always at least one.
    pub fn attempts(&self) -> u32 {
        let attempts = self.budget_ms / self.interval_ms.max(1);
        u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
    }

    /// Run `predicate` under this budget.
    pub fn poll<T, F>(&self, predicate: F) -> Result<Option<T>>
    where
        F: FnMut() -> Result<Option<T>>,
    {
        retry_with_interval(self.interval(), self.attempts(), predicate)
    }
}

/// Sleep for `ms` milliseconds; zero returns immediately.
pub(crate) fn settle(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Timings of the Secure (Jaguar/Mustang) engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecureTimings {
    pub prepare_isp_mode: WaitBudget,
    pub enter_code_loading: WaitBudget,
    /// Per-window acknowledgement while loading the ISP driver.
    pub isp_chunk: WaitBudget,
    pub execute_ram_code: WaitBudget,
    pub enter_fw_update: WaitBudget,
    /// Per-window acknowledgement while sending application sections.
    pub app_chunk: WaitBudget,
    pub install_images: WaitBudget,
    pub reset_settle_ms: u64,
    pub flash_bank_query: WaitBudget,
    pub aux_forward: WaitBudget,
}

impl Default for SecureTimings {
    fn default() -> Self {
        Self {
            prepare_isp_mode: WaitBudget::new(500, 10),
            enter_code_loading: WaitBudget::new(500, 10),
            isp_chunk: WaitBudget::new(10_000, 50),
            execute_ram_code: WaitBudget::new(1_500, 100),
            enter_fw_update: WaitBudget::new(200_000, 500),
            app_chunk: WaitBudget::new(10_000, 200),
            install_images: WaitBudget::new(1_500 * 50, 50),
            reset_settle_ms: 2_000,
            flash_bank_query: WaitBudget::new(100, 20),
            aux_forward: WaitBudget::new(1_000, 20),
        }
    }
}

/// Timings of the Puma engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumaTimings {
    pub code_load_ready: WaitBudget,
    /// Per-window wait for "chunk processed".
    pub chunk_processed: WaitBudget,
    pub isp_driver_ready: WaitBudget,
    pub flash_info_settle_ms: u64,
    pub flash_info_ready: WaitBudget,
    /// Erase wait used when the device reports no erase time.
    pub default_erase_ms: u64,
    pub flash_erase_done: WaitBudget,
    pub validate_settle_ms: u64,
    pub validate: WaitBudget,
    pub reset_settle_ms: u64,
}

impl Default for PumaTimings {
    fn default() -> Self {
        Self {
            code_load_ready: WaitBudget::new(100, 20),
            chunk_processed: WaitBudget::new(10_000, 20),
            isp_driver_ready: WaitBudget::new(250, 20),
            flash_info_settle_ms: 18,
            flash_info_ready: WaitBudget::new(3_000, 20),
            default_erase_ms: 2_000,
            flash_erase_done: WaitBudget::new(3_000, 20),
            validate_settle_ms: 100,
            validate: WaitBudget::new(2_000, 20),
            reset_settle_ms: 3_000,
        }
    }
}

/// All engine timings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IspTimings {
    pub secure: SecureTimings,
    pub puma: PumaTimings,
}

impl IspTimings {
    /// No sleeping at all and a handful of checks per wait. Meant for
    /// simulated transports.
    pub fn immediate() -> Self {
        let quick = WaitBudget::new(8, 0);
        Self {
            secure: SecureTimings {
                prepare_isp_mode: quick,
                enter_code_loading: quick,
                isp_chunk: quick,
                execute_ram_code: quick,
                enter_fw_update: quick,
                app_chunk: quick,
                install_images: quick,
                reset_settle_ms: 0,
                flash_bank_query: quick,
                aux_forward: quick,
            },
            puma: PumaTimings {
                code_load_ready: quick,
                chunk_processed: quick,
                isp_driver_ready: quick,
                flash_info_settle_ms: 0,
                flash_info_ready: quick,
                default_erase_ms: 0,
                flash_erase_done: quick,
                validate_settle_ms: 0,
                validate: quick,
                reset_settle_ms: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_from_budget() {
        assert_eq!(WaitBudget::new(500, 10).attempts(), 50);
        assert_eq!(WaitBudget::new(250, 20).attempts(), 12);
        // Budget shorter than the interval still checks once
        assert_eq!(WaitBudget::new(5, 20).attempts(), 1);
        assert_eq!(WaitBudget::new(8, 0).attempts(), 8);
    }

    #[test]
    fn test_install_budget_matches_attempt_count() {
        let t = SecureTimings::default();
        assert_eq!(t.install_images.attempts(), 1500);
        assert_eq!(t.install_images.interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_toml_roundtrip_and_partial_override() {
        let timings = IspTimings::default();
        let text = toml::to_string(&timings).unwrap();
        let back: IspTimings = toml::from_str(&text).unwrap();
        assert_eq!(back, timings);

        let partial: IspTimings = toml::from_str(
            "[puma]\nreset_settle_ms = 10\n\n[puma.validate]\nbudget_ms = 40\ninterval_ms = 5\n",
        )
        .unwrap();
        assert_eq!(partial.puma.reset_settle_ms, 10);
        assert_eq!(partial.puma.validate, WaitBudget::new(40, 5));
        assert_eq!(partial.puma.code_load_ready, WaitBudget::new(100, 20));
        assert_eq!(partial.secure, SecureTimings::default());
    }
}
