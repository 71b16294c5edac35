//! Reading a full feature snapshot from an open session.

use crate::config::Limits;
use camrelay_core::{FeatureKey, FeatureSnapshot, FeatureValue, SnapshotBuilder};
use camrelay_hw::session::{
    EXPOSURE_AUTO_FEATURE, GAIN_AUTO_FEATURE, GAIN_MAX_FEATURE, GAIN_MIN_FEATURE, HEIGHT_FEATURE,
    WIDTH_FEATURE,
};
use camrelay_hw::{DeviceError, DeviceSession};

/// Extra values only the caller knows.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotExtras {
    /// Overrides asking the device whether capture would be allowed.
    pub capture_allowed: Option<bool>,
    /// Measured frames per second.
    pub frame_rate: Option<f64>,
}

/// Read every feature the snapshot carries. Features the device does not
/// expose are left out; a disconnect aborts the read.
pub fn collect_snapshot(
    session: &mut DeviceSession,
    limits: &Limits,
    extras: SnapshotExtras,
) -> Result<FeatureSnapshot, DeviceError> {
    let mut b = FeatureSnapshot::builder();
    b.insert(FeatureKey::ExposureMin, limits.exposure_min_us)
        .insert(FeatureKey::ExposureMax, limits.exposure_max_us);

    if let Some(model) = soft(session.model())? {
        b.insert(FeatureKey::Model, model);
    }
    if let Some(iface) = soft(session.interface_id())? {
        b.insert(FeatureKey::InterfaceId, iface);
    }
    if let Some(ip) = session.ip_address() {
        b.insert(FeatureKey::IpAddress, ip.to_string());
    }
    let capture_allowed = match extras.capture_allowed {
        Some(allowed) => Some(allowed),
        None => soft(session.permits_exclusive())?,
    };
    if let Some(allowed) = capture_allowed {
        b.insert(FeatureKey::CaptureAllowed, allowed);
    }

    put(&mut b, FeatureKey::Exposure, session.exposure())?;
    put(&mut b, FeatureKey::Gain, session.gain())?;
    for (key, name) in [
        (FeatureKey::ExposureMode, EXPOSURE_AUTO_FEATURE),
        (FeatureKey::GainMode, GAIN_AUTO_FEATURE),
        (FeatureKey::GainMin, GAIN_MIN_FEATURE),
        (FeatureKey::GainMax, GAIN_MAX_FEATURE),
        (FeatureKey::Width, WIDTH_FEATURE),
        (FeatureKey::Height, HEIGHT_FEATURE),
    ] {
        put(&mut b, key, session.feature(name))?;
    }

    if let Some(rate) = extras.frame_rate.filter(|r| r.is_finite()) {
        b.insert(FeatureKey::FrameRate, rate);
    }
    Ok(b.build())
}

fn put(
    b: &mut SnapshotBuilder,
    key: FeatureKey,
    value: Result<FeatureValue, DeviceError>,
) -> Result<(), DeviceError> {
    if let Some(v) = soft(value)? {
        b.insert(key, v);
    }
    Ok(())
}

fn soft<T>(r: Result<T, DeviceError>) -> Result<Option<T>, DeviceError> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_soft() => {
            tracing::debug!(error = %e, "feature skipped");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camrelay_hw::{AccessMode, AccessRegistry, SimCameraSpec, SimulatedSystem};

    const ID: &str = "DEV_000F314C6B39";

    #[test]
    fn test_full_snapshot() {
        let sys = SimulatedSystem::new();
        sys.add_camera(ID, SimCameraSpec::default());
        let reg = AccessRegistry::new();
        let mut s = DeviceSession::open(&sys, &reg, ID, AccessMode::ReadOnly).unwrap();

        let snap = collect_snapshot(&mut s, &Limits::default(), SnapshotExtras::default()).unwrap();
        assert_eq!(snap.get(FeatureKey::Gain), Some(&FeatureValue::Float(21.0)));
        assert_eq!(
            snap.get(FeatureKey::Exposure),
            Some(&FeatureValue::Float(141_491.0))
        );
        assert_eq!(snap.get(FeatureKey::ExposureMin), Some(&FeatureValue::Float(21.0)));
        assert_eq!(snap.get(FeatureKey::Width), Some(&FeatureValue::Int(780)));
        assert_eq!(snap.get(FeatureKey::GainMode), Some(&FeatureValue::from("Off")));
        assert_eq!(
            snap.get(FeatureKey::IpAddress),
            Some(&FeatureValue::from("192.168.1.20"))
        );
        assert_eq!(
            snap.get(FeatureKey::CaptureAllowed),
            Some(&FeatureValue::Bool(true))
        );
        assert_eq!(snap.get(FeatureKey::FrameRate), None);
    }

    #[test]
    fn test_missing_features_are_skipped() {
        let sys = SimulatedSystem::new();
        let h = sys.add_camera(ID, SimCameraSpec::default());
        h.remove_feature("GevCurrentIPAddress");
        h.remove_feature("GainAutoMax");
        let reg = AccessRegistry::new();
        let mut s = DeviceSession::open(&sys, &reg, ID, AccessMode::ReadOnly).unwrap();

        let extras = SnapshotExtras {
            capture_allowed: Some(false),
            frame_rate: Some(9.5),
        };
        let snap = collect_snapshot(&mut s, &Limits::default(), extras).unwrap();
        assert_eq!(snap.get(FeatureKey::IpAddress), None);
        assert_eq!(snap.get(FeatureKey::GainMax), None);
        assert_eq!(
            snap.get(FeatureKey::CaptureAllowed),
            Some(&FeatureValue::Bool(false))
        );
        assert_eq!(snap.get(FeatureKey::FrameRate), Some(&FeatureValue::Float(9.5)));
    }

    #[test]
    fn test_disconnect_aborts() {
        let sys = SimulatedSystem::new();
        let h = sys.add_camera(ID, SimCameraSpec::default());
        let reg = AccessRegistry::new();
        let mut s = DeviceSession::open(&sys, &reg, ID, AccessMode::ReadOnly).unwrap();
        h.set_connected(false);
        let err = collect_snapshot(&mut s, &Limits::default(), SnapshotExtras::default())
            .unwrap_err();
        assert!(matches!(err, DeviceError::Disconnected(_)));
    }
}
