//! Device readiness negotiation: everything that has to happen on the
//! headset before capture is worth attempting. Only the online gate can
//! fail the session; every later step is advisory and proceeds on error.

use std::time::Duration;
use tracing::{debug, warn};

use crate::adb::DeviceProxy;
use crate::clock::Clock;
use crate::mirror::options::DisplayChoice;
use crate::mirror::pipeline::CAPTURE_PROCESS;
use crate::mirror::MirrorError;

const ONLINE_PROBES: u32 = 5;
const ONLINE_PROBE_INTERVAL: Duration = Duration::from_millis(200);
const WAKE_PROBES: u32 = 3;
const WAKE_PROBE_INTERVAL: Duration = Duration::from_millis(300);
const ENCODER_RELEASE_SETTLE: Duration = Duration::from_millis(500);

/// Run the full pre-flight sequence and resolve which display the
/// capture process should record.
pub async fn prepare(
    proxy: &dyn DeviceProxy,
    clock: &dyn Clock,
    serial: &str,
    requested_display: Option<u64>,
) -> Result<DisplayChoice, MirrorError> {
    ensure_online(proxy, clock, serial).await?;
    cleanup_stale_capture(proxy, clock, serial).await;
    wake_device(proxy, clock, serial).await;
    override_sensor(proxy, serial).await;

    let choice = match list_display_ids(proxy, serial).await {
        Some(ids) => resolve_display(&ids, requested_display),
        None => {
            warn!(serial, "display listing failed, defaulting to display 0");
            DisplayChoice::Explicit(0)
        }
    };
    debug!(serial, ?choice, "display resolved");
    Ok(choice)
}

/// Poll the device's online state. The only hard gate in negotiation.
async fn ensure_online(
    proxy: &dyn DeviceProxy,
    clock: &dyn Clock,
    serial: &str,
) -> Result<(), MirrorError> {
    for probe in 0..ONLINE_PROBES {
        if matches!(proxy.is_online(serial).await, Ok(true)) {
            return Ok(());
        }
        if probe + 1 < ONLINE_PROBES {
            clock.sleep(ONLINE_PROBE_INTERVAL).await;
        }
    }
    Err(MirrorError::DeviceUnreachable(serial.to_string()))
}

/// Two-phase cleanup of leftover capture processes: a polite killall
/// first, then a forced kill of each survivor. The polite signal is
/// sometimes ignored by the device's process manager.
async fn cleanup_stale_capture(proxy: &dyn DeviceProxy, clock: &dyn Clock, serial: &str) {
    let _ = proxy.run_shell(serial, &["killall", CAPTURE_PROCESS]).await;

    match proxy.run_shell(serial, &["pidof", CAPTURE_PROCESS]).await {
        Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
            let pids: Vec<&str> = out.stdout.split_whitespace().collect();
            warn!(serial, ?pids, "lingering capture processes, force killing");
            for pid in pids {
                let _ = proxy.run_shell(serial, &["kill", "-9", pid]).await;
            }
        }
        Ok(_) => {}
        Err(e) => debug!(serial, error = %e, "stale-capture probe failed"),
    }

    // Give the hardware encoder a moment to be released.
    clock.sleep(ENCODER_RELEASE_SETTLE).await;
}

/// Wake the device if its power state is not Awake. Device state
/// reporting is unreliable, so this never blocks the session.
async fn wake_device(proxy: &dyn DeviceProxy, clock: &dyn Clock, serial: &str) {
    for _ in 0..WAKE_PROBES {
        match proxy.run_shell(serial, &["dumpsys", "power"]).await {
            Ok(out) if out.stdout.contains("mWakefulness=Awake") => return,
            Ok(_) => {}
            Err(e) => {
                debug!(serial, error = %e, "power state query failed");
            }
        }
        let _ = proxy
            .run_shell(serial, &["input", "keyevent", "WAKEUP"])
            .await;
        clock.sleep(WAKE_PROBE_INTERVAL).await;
    }
    warn!(serial, "device did not report Awake state, proceeding anyway");
}

/// Disable proximity-based screen blanking and assert user presence.
/// Fire-and-forget; the broadcasts are device-specific and may not exist.
async fn override_sensor(proxy: &dyn DeviceProxy, serial: &str) {
    for action in [
        "com.oculus.vrpowermanager.prox_close",
        "com.oculus.vrpowermanager.automation_disable",
    ] {
        let _ = proxy
            .run_shell(serial, &["am", "broadcast", "-a", action])
            .await;
    }
}

/// Discover compositor output ids, or None when the listing fails.
async fn list_display_ids(proxy: &dyn DeviceProxy, serial: &str) -> Option<Vec<u64>> {
    match proxy
        .run_shell(serial, &["dumpsys", "SurfaceFlinger", "--display-id"])
        .await
    {
        Ok(out) if out.success() => {
            let ids = parse_display_ids(&out.stdout);
            if ids.is_empty() {
                None
            } else {
                Some(ids)
            }
        }
        _ => None,
    }
}

/// Parse `dumpsys SurfaceFlinger --display-id` output:
/// one `Display <id> (...)` line per output.
fn parse_display_ids(output: &str) -> Vec<u64> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Display ")?;
            rest.split_whitespace().next()?.parse().ok()
        })
        .collect()
}

/// Pick the display flag for the capture invocation. Primary = lowest
/// discovered id. A single-display device gets no flag at all: some
/// firmware rejects an explicit id in that case, and the capture tool's
/// own default is strictly safer.
fn resolve_display(discovered: &[u64], requested: Option<u64>) -> DisplayChoice {
    let primary = match discovered.iter().min() {
        Some(&id) => id,
        None => return DisplayChoice::Explicit(0),
    };

    match requested {
        None if discovered.len() == 1 => DisplayChoice::Omit,
        None => DisplayChoice::Explicit(primary),
        Some(id) if discovered.contains(&id) => DisplayChoice::Explicit(id),
        Some(id) => {
            warn!(
                requested = id,
                fallback = primary,
                "requested display not present, falling back to primary"
            );
            DisplayChoice::Explicit(primary)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::testutil::{FakeClock, FakeProxy};

    #[test]
    fn test_resolve_display_no_request_picks_primary() {
        assert_eq!(
            resolve_display(&[0, 1, 3], None),
            DisplayChoice::Explicit(0)
        );
        assert_eq!(
            resolve_display(&[3, 1, 7], None),
            DisplayChoice::Explicit(1)
        );
    }

    #[test]
    fn test_resolve_display_single_display_omits_flag() {
        assert_eq!(resolve_display(&[0], None), DisplayChoice::Omit);
        assert_eq!(resolve_display(&[5], None), DisplayChoice::Omit);
    }

    #[test]
    fn test_resolve_display_requested_present() {
        assert_eq!(
            resolve_display(&[0, 1, 3], Some(3)),
            DisplayChoice::Explicit(3)
        );
        // Requested id wins even on a single-display device.
        assert_eq!(resolve_display(&[0], Some(0)), DisplayChoice::Explicit(0));
    }

    #[test]
    fn test_resolve_display_requested_absent_falls_back() {
        assert_eq!(
            resolve_display(&[0, 1, 3], Some(9)),
            DisplayChoice::Explicit(0)
        );
    }

    #[test]
    fn test_parse_display_ids() {
        let output = "Display 4619827259835644672 (HWC display 0): port=0\n\
                      Display 4619827551948147201 (HWC display 1): port=1\n\
                      some unrelated line\n";
        assert_eq!(
            parse_display_ids(output),
            vec![4619827259835644672, 4619827551948147201]
        );
        assert!(parse_display_ids("no displays here").is_empty());
    }

    #[tokio::test]
    async fn test_prepare_offline_device_is_a_hard_gate() {
        let proxy = FakeProxy::new().online(false);
        let clock = FakeClock::new();

        let err = prepare(&proxy, &clock, "SER123", None)
            .await
            .expect_err("offline device must fail preparation");
        assert!(matches!(err, MirrorError::DeviceUnreachable(s) if s == "SER123"));

        // Five probes, sleeping between them but not after the last.
        assert_eq!(
            clock.sleeps_of(ONLINE_PROBE_INTERVAL),
            (ONLINE_PROBES - 1) as usize
        );
    }

    #[tokio::test]
    async fn test_prepare_happy_path_sequences_device_commands() {
        let proxy = FakeProxy::new()
            .shell_ok("dumpsys power", "mWakefulness=Awake\n")
            .shell_ok(
                "dumpsys SurfaceFlinger --display-id",
                "Display 0 (HWC display 0): port=0\nDisplay 1 (HWC display 1): port=1\n",
            )
            .shell_fail("pidof", "");
        let clock = FakeClock::new();

        let choice = prepare(&proxy, &clock, "SER123", None).await.unwrap();
        assert_eq!(choice, DisplayChoice::Explicit(0));

        let log = proxy.shell_log();
        assert!(log.iter().any(|c| c == "killall screenrecord"));
        assert!(log.iter().any(|c| c == "pidof screenrecord"));
        assert!(log
            .iter()
            .any(|c| c == "am broadcast -a com.oculus.vrpowermanager.prox_close"));
        assert!(log
            .iter()
            .any(|c| c == "am broadcast -a com.oculus.vrpowermanager.automation_disable"));
        // Awake on the first probe: no wake keyevent needed.
        assert!(!log.iter().any(|c| c.contains("keyevent")));
    }

    #[tokio::test]
    async fn test_prepare_force_kills_lingering_captures() {
        let proxy = FakeProxy::new()
            .shell_ok("pidof", "123 456\n")
            .shell_ok("dumpsys power", "mWakefulness=Awake\n")
            .shell_ok(
                "dumpsys SurfaceFlinger --display-id",
                "Display 0 (HWC display 0)\n",
            );
        let clock = FakeClock::new();

        prepare(&proxy, &clock, "SER123", None).await.unwrap();

        let log = proxy.shell_log();
        assert!(log.iter().any(|c| c == "kill -9 123"));
        assert!(log.iter().any(|c| c == "kill -9 456"));
    }

    #[tokio::test]
    async fn test_prepare_wake_retries_then_proceeds() {
        // Never reports awake; negotiation must still succeed.
        let proxy = FakeProxy::new()
            .shell_ok("dumpsys power", "mWakefulness=Asleep\n")
            .shell_fail("pidof", "")
            .shell_ok(
                "dumpsys SurfaceFlinger --display-id",
                "Display 0 (HWC display 0)\n",
            );
        let clock = FakeClock::new();

        let choice = prepare(&proxy, &clock, "SER123", None).await.unwrap();
        assert_eq!(choice, DisplayChoice::Omit);

        let wakeups = proxy
            .shell_log()
            .iter()
            .filter(|c| c.as_str() == "input keyevent WAKEUP")
            .count();
        assert_eq!(wakeups, WAKE_PROBES as usize);
    }

    #[tokio::test]
    async fn test_prepare_display_listing_failure_defaults_to_zero() {
        let proxy = FakeProxy::new()
            .shell_ok("dumpsys power", "mWakefulness=Awake\n")
            .shell_fail("pidof", "")
            .shell_fail("dumpsys SurfaceFlinger --display-id", "not supported");
        let clock = FakeClock::new();

        let choice = prepare(&proxy, &clock, "SER123", None).await.unwrap();
        assert_eq!(choice, DisplayChoice::Explicit(0));
    }

    #[tokio::test]
    async fn test_prepare_comes_online_late() {
        let proxy = FakeProxy::new()
            .online_sequence(&[false, false, true])
            .shell_ok("dumpsys power", "mWakefulness=Awake\n")
            .shell_fail("pidof", "")
            .shell_ok(
                "dumpsys SurfaceFlinger --display-id",
                "Display 0 (HWC display 0)\n",
            );
        let clock = FakeClock::new();

        let choice = prepare(&proxy, &clock, "SER123", None).await.unwrap();
        assert_eq!(choice, DisplayChoice::Omit);
        assert_eq!(clock.sleeps_of(ONLINE_PROBE_INTERVAL), 2);
    }
}
