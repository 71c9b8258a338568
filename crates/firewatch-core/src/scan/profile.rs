// Scan profiles and target safety validation.
//
// A target must parse as an IPv4 address inside RFC1918 space before any
// subprocess is considered; everything else is a hard rejection. Parsing
// as an address also guarantees no shell metacharacters survive, and the
// argument list is passed to the process directly, never through a shell.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::model::ScanProfile;
use crate::CoreError;

/// Profile-specific argument list (the target and `-oX -` are appended by
/// the executor).
pub fn profile_args(profile: ScanProfile) -> &'static [&'static str] {
    match profile {
        ScanProfile::Quick => &["-Pn", "-T4", "-F"],
        ScanProfile::Balanced => &["-Pn", "-sV", "-O", "--version-intensity", "5", "-T4"],
        ScanProfile::Thorough => &["-Pn", "-sV", "-sC", "-O", "--version-all", "-T3"],
    }
}

/// Hard wall-clock bound per profile.
pub fn profile_timeout(profile: ScanProfile) -> Duration {
    match profile {
        ScanProfile::Quick => Duration::from_secs(60),
        ScanProfile::Balanced => Duration::from_secs(120),
        ScanProfile::Thorough => Duration::from_secs(180),
    }
}

/// Validate a scan target: must be an IPv4 address in RFC1918 private
/// space (10/8, 172.16/12, 192.168/16).
pub fn validate_target(raw: &str) -> Result<Ipv4Addr, CoreError> {
    let ip: Ipv4Addr = raw.trim().parse().map_err(|_| {
        CoreError::Safety(format!("'{raw}' is not a valid IPv4 address"))
    })?;
    if !ip.is_private() {
        return Err(CoreError::Safety(format!(
            "{ip} is outside RFC1918 private space (10.x, 172.16-31.x, 192.168.x)"
        )));
    }
    Ok(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges_are_accepted() {
        assert!(validate_target("10.0.0.1").is_ok());
        assert!(validate_target("172.16.0.1").is_ok());
        assert!(validate_target("172.31.255.254").is_ok());
        assert!(validate_target("192.168.1.50").is_ok());
    }

    #[test]
    fn public_addresses_are_rejected() {
        for target in ["8.8.8.8", "1.1.1.1", "172.32.0.1", "193.0.0.1"] {
            assert!(
                matches!(validate_target(target), Err(CoreError::Safety(_))),
                "{target} should be rejected"
            );
        }
    }

    #[test]
    fn loopback_and_link_local_are_rejected_as_targets() {
        assert!(validate_target("127.0.0.1").is_err());
        assert!(validate_target("169.254.0.1").is_err());
    }

    #[test]
    fn non_addresses_are_rejected() {
        for target in ["localhost", "192.168.1.1; rm -rf /", "192.168.1.0/24", "$(whoami)", ""] {
            assert!(
                matches!(validate_target(target), Err(CoreError::Safety(_))),
                "{target:?} should be rejected"
            );
        }
    }

    #[test]
    fn timeouts_scale_with_profile() {
        assert_eq!(profile_timeout(ScanProfile::Quick).as_secs(), 60);
        assert_eq!(profile_timeout(ScanProfile::Balanced).as_secs(), 120);
        assert_eq!(profile_timeout(ScanProfile::Thorough).as_secs(), 180);
    }

    #[test]
    fn args_never_include_shell_constructs() {
        for profile in [ScanProfile::Quick, ScanProfile::Balanced, ScanProfile::Thorough] {
            for arg in profile_args(profile) {
                assert!(!arg.contains(';') && !arg.contains('|') && !arg.contains('&'));
            }
        }
    }
}
