// ── Rule resolution ──
//
// The pure computation at the heart of the firewall: given the rule
// set, the installed-app catalog, and the current environment, produce
// the set of UIDs whose outbound traffic must be dropped. No I/O, no
// logging, no interior mutability — same inputs, same output.

use std::collections::HashMap;

use crate::allowlist;
use crate::model::{
    BlockedSet, DefaultPolicy, FirewallRule, InstalledApp, NetworkType, ScreenState, Uid,
};

/// Everything the resolver needs for one computation.
#[derive(Debug, Clone)]
pub struct ResolverInput<'a> {
    /// All persisted rules; entries with `enabled = false` are ignored.
    pub rules: &'a [FirewallRule],
    pub installed: &'a [InstalledApp],
    pub transport: NetworkType,
    pub screen: ScreenState,
    pub policy: DefaultPolicy,
}

/// Whether a single enabled rule blocks under the given environment.
///
/// `NetworkType::None` only occurs during the boot window before any
/// transport is up; blocking when either the wifi or the mobile flag is
/// set is intentionally conservative there.
pub fn rule_blocks(rule: &FirewallRule, transport: NetworkType, screen: ScreenState) -> bool {
    if screen == ScreenState::Off && rule.block_when_screen_off {
        return true;
    }
    match transport {
        NetworkType::None => rule.wifi_blocked || rule.mobile_blocked,
        NetworkType::Wifi => rule.wifi_blocked,
        NetworkType::Mobile => rule.mobile_blocked,
        NetworkType::MobileRoaming => rule.mobile_blocked || rule.roaming_blocked,
    }
}

/// Compute the blocked-UID set.
///
/// UIDs may be shared across packages, so the conservative rule
/// applies: if ANY enabled rule for a UID blocks, the UID is blocked.
/// Own, system-critical, and VPN-provider packages are never blocked,
/// and their presence under a shared UID exempts that UID entirely.
pub fn resolve(input: &ResolverInput<'_>) -> BlockedSet {
    // Group enabled rules by UID and evaluate the per-rule predicate
    // once per rule.
    let mut any_block: HashMap<Uid, bool> = HashMap::new();
    for rule in input.rules.iter().filter(|r| r.enabled) {
        let blocks = rule_blocks(rule, input.transport, input.screen);
        any_block
            .entry(rule.uid)
            .and_modify(|b| *b |= blocks)
            .or_insert(blocks);
    }

    let mut blocked = BlockedSet::new();
    let mut exempt_uids: Vec<Uid> = Vec::new();

    for app in input.installed.iter().filter(|a| allowlist::uses_network(a)) {
        if allowlist::is_exempt(app) {
            exempt_uids.push(app.uid);
            continue;
        }
        let blocks = match any_block.get(&app.uid) {
            Some(&any) => any,
            None => input.policy == DefaultPolicy::BlockAll,
        };
        if blocks {
            blocked.insert(app.uid);
        }
    }

    // An exempt package sharing a UID with a blockable one wins: the
    // kernel cannot distinguish them, so the UID stays open.
    let mut result = BlockedSet::new();
    for uid in blocked.iter() {
        if !exempt_uids.contains(&uid) {
            result.insert(uid);
        }
    }
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::fn_params_excessive_bools)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::allowlist::{BIND_VPN_SERVICE, OWN_APP_IDS};
    use crate::model::AppId;

    fn rule(uid: u32, wifi: bool, mobile: bool, roaming: bool, screen_off: bool) -> FirewallRule {
        FirewallRule {
            app: AppId::new(format!("com.test.app{uid}"), 0),
            uid: Uid(uid),
            enabled: true,
            wifi_blocked: wifi,
            mobile_blocked: mobile,
            roaming_blocked: roaming,
            block_when_screen_off: screen_off,
            last_modified: Utc::now(),
        }
    }

    fn net_app(package: &str, uid: u32) -> InstalledApp {
        InstalledApp {
            app: AppId::new(package, 0),
            uid: Uid(uid),
            permissions: vec!["android.permission.INTERNET".into()],
            service_permissions: Vec::new(),
        }
    }

    // ── rule_blocks truth table ──────────────────────────────────────

    /// Reference semantics, written independently of the implementation.
    fn expected(
        flags: (bool, bool, bool, bool),
        transport: NetworkType,
        screen: ScreenState,
    ) -> bool {
        let (wifi, mobile, roaming, screen_off) = flags;
        if screen == ScreenState::Off && screen_off {
            return true;
        }
        match transport {
            NetworkType::None => wifi || mobile,
            NetworkType::Wifi => wifi,
            NetworkType::Mobile => mobile,
            NetworkType::MobileRoaming => mobile || roaming,
        }
    }

    #[test]
    fn rule_blocks_exhaustive() {
        let transports = [
            NetworkType::None,
            NetworkType::Wifi,
            NetworkType::Mobile,
            NetworkType::MobileRoaming,
        ];
        let screens = [ScreenState::On, ScreenState::Off];
        let bools = [false, true];

        for wifi in bools {
            for mobile in bools {
                for roaming in bools {
                    for screen_off in bools {
                        let r = rule(10000, wifi, mobile, roaming, screen_off);
                        for transport in transports {
                            for screen in screens {
                                assert_eq!(
                                    rule_blocks(&r, transport, screen),
                                    expected((wifi, mobile, roaming, screen_off), transport, screen),
                                    "flags=({wifi},{mobile},{roaming},{screen_off}) \
                                     transport={transport} screen={screen}"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    // ── resolve ──────────────────────────────────────────────────────

    #[test]
    fn disabled_rule_falls_through_to_policy() {
        let mut r = rule(10123, true, true, true, true);
        r.enabled = false;
        let installed = [net_app("com.test.app10123", 10123)];

        let blocked = resolve(&ResolverInput {
            rules: &[r],
            installed: &installed,
            transport: NetworkType::Wifi,
            screen: ScreenState::On,
            policy: DefaultPolicy::AllowAll,
        });
        assert!(blocked.is_empty());
    }

    #[test]
    fn block_all_policy_blocks_unruled_apps() {
        let installed = [net_app("com.a", 10001), net_app("com.b", 10002)];
        let blocked = resolve(&ResolverInput {
            rules: &[],
            installed: &installed,
            transport: NetworkType::Wifi,
            screen: ScreenState::On,
            policy: DefaultPolicy::BlockAll,
        });
        assert_eq!(blocked.len(), 2);
    }

    #[test]
    fn own_app_never_blocked_even_under_block_all() {
        let installed = [net_app(OWN_APP_IDS[0], 10050), net_app("com.y", 10124)];
        let blocked = resolve(&ResolverInput {
            rules: &[],
            installed: &installed,
            transport: NetworkType::Wifi,
            screen: ScreenState::On,
            policy: DefaultPolicy::BlockAll,
        });
        assert!(!blocked.contains(Uid(10050)));
        assert!(blocked.contains(Uid(10124)));
    }

    #[test]
    fn vpn_provider_never_blocked_even_with_blocking_rule() {
        let mut provider = net_app("com.example.vpn", 10200);
        provider.service_permissions = vec![BIND_VPN_SERVICE.into()];
        let r = rule(10200, true, true, true, true);

        let blocked = resolve(&ResolverInput {
            rules: &[r],
            installed: &[provider],
            transport: NetworkType::Wifi,
            screen: ScreenState::Off,
            policy: DefaultPolicy::BlockAll,
        });
        assert!(blocked.is_empty());
    }

    #[test]
    fn shared_uid_any_blocking_rule_wins() {
        // Two packages share UID 10300; one blocks on mobile, one allows.
        let mut allow = rule(10300, false, false, false, false);
        allow.app = AppId::new("com.shared.allow", 0);
        let mut block = rule(10300, false, true, false, false);
        block.app = AppId::new("com.shared.block", 0);

        let installed = [
            net_app("com.shared.allow", 10300),
            net_app("com.shared.block", 10300),
        ];
        let blocked = resolve(&ResolverInput {
            rules: &[allow, block],
            installed: &installed,
            transport: NetworkType::Mobile,
            screen: ScreenState::On,
            policy: DefaultPolicy::AllowAll,
        });
        assert!(blocked.contains(Uid(10300)));
    }

    #[test]
    fn exempt_package_sharing_uid_exempts_the_uid() {
        let r = rule(10400, true, true, false, false);
        let installed = [
            net_app("com.example.normal", 10400),
            net_app(OWN_APP_IDS[0], 10400),
        ];
        let blocked = resolve(&ResolverInput {
            rules: &[r],
            installed: &installed,
            transport: NetworkType::Wifi,
            screen: ScreenState::On,
            policy: DefaultPolicy::AllowAll,
        });
        assert!(blocked.is_empty());
    }

    #[test]
    fn app_without_network_permission_is_ignored() {
        let mut offline = net_app("com.example.offline", 10500);
        offline.permissions.clear();
        let blocked = resolve(&ResolverInput {
            rules: &[],
            installed: &[offline],
            transport: NetworkType::Wifi,
            screen: ScreenState::On,
            policy: DefaultPolicy::BlockAll,
        });
        assert!(blocked.is_empty());
    }

    #[test]
    fn resolve_is_pure() {
        let rules = [rule(10123, true, false, false, false)];
        let installed = [net_app("com.test.app10123", 10123), net_app("com.y", 10124)];
        let input = ResolverInput {
            rules: &rules,
            installed: &installed,
            transport: NetworkType::Wifi,
            screen: ScreenState::On,
            policy: DefaultPolicy::AllowAll,
        };

        let first = resolve(&input);
        for _ in 0..10 {
            assert_eq!(resolve(&input), first);
        }
    }
}
