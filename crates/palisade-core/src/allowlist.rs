// ── Baked-in allow lists ──
//
// Immutable package sets the resolver must never block, plus the
// predicates that classify installed apps. These are compile-time
// constants: mutating them at runtime would undermine the guarantee
// that critical infrastructure keeps its network access.

use crate::model::InstalledApp;

/// The packages belonging to this tool itself. Blocking these would cut
/// off the control surface (and the tunnel backend's own interface).
pub const OWN_APP_IDS: [&str; 2] = ["dev.palisade.fw", "dev.palisade.fw.ui"];

/// Critical network infrastructure and UI packages. A rule is seeded
/// all-allow for each of these; the resolver skips them unconditionally.
pub const SYSTEM_CRITICAL: [&str; 6] = [
    "com.android.resolver.dns",
    "com.android.networkstack",
    "com.android.networkstack.tethering",
    "com.android.systemui",
    "com.android.settings",
    "com.android.phone",
];

/// Packages allowed by default when the external rule manager seeds
/// first-run rules. These do NOT override explicit rules — they only
/// shape seeding, so the resolver ignores them.
pub const SYSTEM_RECOMMENDED_ALLOW: [&str; 4] = [
    "com.android.wifi",
    "com.android.bluetooth",
    "com.android.providers.downloads",
    "com.android.nfc",
];

/// Bind permission an app service must require to act as the OS tunnel
/// endpoint.
pub const BIND_VPN_SERVICE: &str = "android.permission.BIND_VPN_SERVICE";

/// Install-time permissions that mark an app as network-using. Apps
/// declaring none of these are invisible to the resolver.
pub const NETWORK_PERMISSIONS: [&str; 3] = [
    "android.permission.INTERNET",
    "android.permission.CHANGE_NETWORK_STATE",
    "android.permission.CHANGE_WIFI_STATE",
];

/// True iff any of the app's declared services requires the OS VPN bind
/// permission. Such apps are never enforced against: dropping their
/// traffic would break every tunnel they provide.
pub fn is_vpn_provider(app: &InstalledApp) -> bool {
    app.service_permissions
        .iter()
        .any(|p| p == BIND_VPN_SERVICE)
}

/// True iff the app declares at least one recognized network permission.
pub fn uses_network(app: &InstalledApp) -> bool {
    app.permissions
        .iter()
        .any(|p| NETWORK_PERMISSIONS.contains(&p.as_str()))
}

/// True iff the package may never be blocked, regardless of rules or
/// default policy.
pub fn is_exempt(app: &InstalledApp) -> bool {
    let pkg = app.app.package.as_str();
    OWN_APP_IDS.contains(&pkg) || SYSTEM_CRITICAL.contains(&pkg) || is_vpn_provider(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AppId, Uid};

    fn app(package: &str, service_permissions: &[&str]) -> InstalledApp {
        InstalledApp {
            app: AppId::new(package, 0),
            uid: Uid(10000),
            permissions: vec!["android.permission.INTERNET".into()],
            service_permissions: service_permissions.iter().map(|s| (*s).into()).collect(),
        }
    }

    #[test]
    fn own_packages_are_exempt() {
        for pkg in OWN_APP_IDS {
            assert!(is_exempt(&app(pkg, &[])), "{pkg} must be exempt");
        }
    }

    #[test]
    fn vpn_provider_is_exempt_regardless_of_package() {
        assert!(is_exempt(&app("com.example.vpn", &[BIND_VPN_SERVICE])));
        assert!(!is_exempt(&app("com.example.vpn", &[])));
    }

    #[test]
    fn recommended_allow_does_not_exempt() {
        // Seeding hint only; an explicit rule can still block these.
        assert!(!is_exempt(&app("com.android.bluetooth", &[])));
    }

    #[test]
    fn app_without_network_permission_is_invisible() {
        let mut a = app("com.example.offline", &[]);
        a.permissions.clear();
        assert!(!uses_network(&a));
    }
}
