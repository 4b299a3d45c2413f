/*!
 * Host environment probe
 *
 * Gathers the signals that feed the environment fingerprint. On a
 * workstation the browser-style signals map to the process environment
 * and the host platform.
 */

use chrono::Local;
use sacristan_core_vigil::integrity::{EnvSignals, EnvironmentSource};

/// Environment source backed by the host process environment
#[derive(Debug, Default, Clone)]
pub struct HostEnvironment;

impl HostEnvironment {
    pub fn new() -> Self {
        HostEnvironment
    }
}

impl EnvironmentSource for HostEnvironment {
    fn signals(&self) -> EnvSignals {
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "unknown-host".to_string());
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown-user".to_string());
        let locale = std::env::var("LANG").unwrap_or_else(|_| "C".to_string());
        // Terminal dimensions stand in for screen geometry when exported
        let screen = match (std::env::var("COLUMNS"), std::env::var("LINES")) {
            (Ok(cols), Ok(lines)) => format!("{}x{}", cols, lines),
            _ => "unsized".to_string(),
        };
        // In minutes east of UTC
        let timezone_offset_min = Local::now().offset().local_minus_utc() / 60;

        EnvSignals {
            client_id: format!("{}@{}", user, hostname),
            locale,
            screen,
            timezone_offset_min,
            platform: std::env::consts::OS.to_string(),
            cookies_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_are_stable_within_process() {
        let probe = HostEnvironment::new();
        let a = probe.signals();
        let b = probe.signals();
        assert_eq!(a, b);
        assert!(!a.platform.is_empty());
    }
}
