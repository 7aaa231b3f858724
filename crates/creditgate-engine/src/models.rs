//! Model registry with explicit access gating.
//!
//! Gating is an attribute on the registry entry (`requires_vip`,
//! `admin_only`) rather than a property of the model name. Names absent
//! from the registry fall back to the `vip_`/`vip-` prefix convention so
//! externally-added VIP models stay gated.

use creditgate_core::{ModelEntry, SubscriptionPlan, UserRole};

/// Name prefixes marking an unregistered model as VIP-gated.
const VIP_NAME_PREFIXES: &[&str] = &["vip_", "vip-"];

/// Registry of the models the gateway serves.
pub struct ModelRegistry {
    entries: Vec<ModelEntry>,
}

impl ModelRegistry {
    /// The built-in registry.
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                ModelEntry {
                    name: "gpt-3.5-turbo".to_string(),
                    description: "GPT-3.5 Turbo model".to_string(),
                    requires_vip: false,
                    admin_only: false,
                },
                ModelEntry {
                    name: "llama-2".to_string(),
                    description: "Llama 2 model".to_string(),
                    requires_vip: false,
                    admin_only: false,
                },
                ModelEntry {
                    name: "gpt-4".to_string(),
                    description: "GPT-4 model".to_string(),
                    requires_vip: true,
                    admin_only: false,
                },
                ModelEntry {
                    name: "vip-gpt-4".to_string(),
                    description: "VIP GPT-4 model".to_string(),
                    requires_vip: true,
                    admin_only: false,
                },
                ModelEntry {
                    name: "admin-gpt-4".to_string(),
                    description: "Admin GPT-4 model".to_string(),
                    requires_vip: false,
                    admin_only: true,
                },
            ],
        }
    }

    /// Build a registry from explicit entries.
    pub fn with_entries(entries: Vec<ModelEntry>) -> Self {
        Self { entries }
    }

    /// Find the registry entry for a model name.
    pub fn entry(&self, name: &str) -> Option<&ModelEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Whether a model requires a plan with VIP access.
    ///
    /// Registered models use their explicit attribute; unregistered names
    /// fall back to the prefix convention.
    #[must_use]
    pub fn vip_gated(&self, name: &str) -> bool {
        if let Some(entry) = self.entry(name) {
            return entry.requires_vip;
        }
        let lower = name.to_lowercase();
        VIP_NAME_PREFIXES.iter().any(|p| lower.starts_with(p))
    }

    /// Whether a model requires the `Admin` role.
    #[must_use]
    pub fn admin_gated(&self, name: &str) -> bool {
        self.entry(name).is_some_and(|e| e.admin_only)
    }

    /// The models available to a caller with the given role and plan.
    ///
    /// VIP entries are listed only when the active plan grants VIP access;
    /// admin entries only for the `Admin` role.
    pub fn available_for(&self, role: UserRole, plan: Option<&SubscriptionPlan>) -> Vec<ModelEntry> {
        let vip_access = plan.is_some_and(|p| p.can_access_vip_models);
        self.entries
            .iter()
            .filter(|e| {
                if e.admin_only {
                    role.is_admin()
                } else if e.requires_vip {
                    vip_access
                } else {
                    true
                }
            })
            .cloned()
            .collect()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use creditgate_core::PlanId;
    use rust_decimal_macros::dec;

    fn plan(vip: bool) -> SubscriptionPlan {
        SubscriptionPlan {
            id: PlanId::new(),
            name: if vip { "premium" } else { "basic" }.to_string(),
            price: dec!(10),
            duration_days: 30,
            max_chats_per_hour: 10,
            max_tokens_per_month: 1_000_000,
            can_access_vip_models: vip,
            description: None,
        }
    }

    #[test]
    fn test_registered_attribute_wins_over_name() {
        let registry = ModelRegistry::builtin();
        // "gpt-4" carries no VIP prefix but is gated by its entry.
        assert!(registry.vip_gated("gpt-4"));
        assert!(!registry.vip_gated("gpt-3.5-turbo"));
    }

    #[test]
    fn test_unregistered_name_uses_prefix_convention() {
        let registry = ModelRegistry::builtin();
        assert!(registry.vip_gated("vip_claude"));
        assert!(registry.vip_gated("vip-claude"));
        assert!(!registry.vip_gated("claude"));
    }

    #[test]
    fn test_admin_gating() {
        let registry = ModelRegistry::builtin();
        assert!(registry.admin_gated("admin-gpt-4"));
        assert!(!registry.admin_gated("gpt-4"));
        assert!(!registry.admin_gated("unknown"));
    }

    #[test]
    fn test_available_for_basic_plan() {
        let registry = ModelRegistry::builtin();
        let basic = plan(false);
        let names: Vec<String> = registry
            .available_for(UserRole::User, Some(&basic))
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["gpt-3.5-turbo", "llama-2"]);
    }

    #[test]
    fn test_available_for_vip_plan() {
        let registry = ModelRegistry::builtin();
        let premium = plan(true);
        let names: Vec<String> = registry
            .available_for(UserRole::User, Some(&premium))
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["gpt-3.5-turbo", "llama-2", "gpt-4", "vip-gpt-4"]);
    }

    #[test]
    fn test_available_for_admin_appends_admin_entry() {
        let registry = ModelRegistry::builtin();
        let names: Vec<String> = registry
            .available_for(UserRole::Admin, None)
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["gpt-3.5-turbo", "llama-2", "admin-gpt-4"]);
    }
}
