//! Core group-mapping compiler.
//!
//! A single-pass, side-effect-free transformation from the manifest's group
//! list and the live organization-ID table into [`CompiledSso`]. The compiler
//! either returns a fully populated output or fails atomically with a
//! [`MappingError`]; callers never see a half-computed mapping.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::expression::AdminExpression;
use crate::errors::MappingError;

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// Grafana role vocabulary, including the `GrafanaAdmin` super-role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    None,
    Viewer,
    Editor,
    Admin,
    GrafanaAdmin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Viewer => write!(f, "Viewer"),
            Self::Editor => write!(f, "Editor"),
            Self::Admin => write!(f, "Admin"),
            Self::GrafanaAdmin => write!(f, "GrafanaAdmin"),
        }
    }
}

/// Target of an [`OrgMapping`]: one named organization, or all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrgSelector {
    /// The `"*"` wildcard -- the role applies in every organization.
    Wildcard,
    /// A single organization, referenced by name.
    Named(String),
}

impl OrgSelector {
    /// The organization name, or `None` for the wildcard.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Wildcard => None,
            Self::Named(name) => Some(name),
        }
    }
}

impl From<String> for OrgSelector {
    fn from(value: String) -> Self {
        if value == "*" {
            Self::Wildcard
        } else {
            Self::Named(value)
        }
    }
}

impl From<OrgSelector> for String {
    fn from(value: OrgSelector) -> Self {
        match value {
            OrgSelector::Wildcard => "*".to_string(),
            OrgSelector::Named(name) => name,
        }
    }
}

/// One group's role in one organization (or all organizations).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgMapping {
    /// Organization name, or `"*"` for all organizations.
    pub org: OrgSelector,
    /// Role granted in the organization(s).
    pub role: Role,
}

/// An identity-provider group with zero or more org/role assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group name as reported by the identity provider.
    pub name: String,
    /// Role assignments, in manifest order.
    #[serde(default)]
    pub org_mappings: Vec<OrgMapping>,
}

/// Organization name -> numeric ID, as provisioned in the target instance.
///
/// A `BTreeMap` keeps iteration deterministic; the compiler only performs
/// point lookups, so ordering never leaks into the output anyway.
pub type OrgIdTable = BTreeMap<String, i64>;

/// The two string-valued SSO settings produced by [`compile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSso {
    /// Admin-elevation expression, or `None` when no group maps to
    /// `GrafanaAdmin` and no static fallback was supplied.
    pub role_attribute_path: Option<String>,
    /// Newline-joined `group:org:role` entries, or `None` when no dynamic
    /// mapping exists and no static fallback was supplied.
    pub org_mapping: Option<String>,
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Names of groups with at least one `GrafanaAdmin` mapping, de-duplicated,
/// in first-seen order.
pub fn collect_admin_groups(groups: &[Group]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for group in groups {
        let is_admin = group
            .org_mappings
            .iter()
            .any(|m| m.role == Role::GrafanaAdmin);
        if is_admin && !names.iter().any(|n| n == &group.name) {
            names.push(group.name.clone());
        }
    }
    names
}

/// Build the admin-elevation expression for the given group names.
///
/// Returns `Ok(None)` when `admin_groups` is empty.
pub fn build_admin_expression(admin_groups: &[String]) -> Result<Option<String>, MappingError> {
    let mut expr = AdminExpression::new();
    for name in admin_groups {
        expr.push_group(name)?;
    }
    Ok(expr.render())
}

/// Build the `group:org:role` mapping lines, in encounter order (group
/// order, then mapping order within each group). `GrafanaAdmin` mappings are
/// excluded; they are expressed through the admin expression instead.
///
/// A named org missing from `org_ids` is fatal: silently dropping a role
/// assignment would be a security-relevant correctness bug.
pub fn build_org_mapping(
    groups: &[Group],
    org_ids: &OrgIdTable,
) -> Result<Vec<String>, MappingError> {
    let mut lines = Vec::new();
    for group in groups {
        for mapping in &group.org_mappings {
            if mapping.role == Role::GrafanaAdmin {
                continue;
            }
            match &mapping.org {
                OrgSelector::Wildcard => {
                    lines.push(format!("{}:*:{}", group.name, mapping.role));
                }
                OrgSelector::Named(org) => {
                    let id = org_ids.get(org.as_str()).ok_or_else(|| {
                        MappingError::UnknownOrganization {
                            group: group.name.clone(),
                            org: org.clone(),
                            role: mapping.role.to_string(),
                        }
                    })?;
                    lines.push(format!("{}:{}:{}", group.name, id, mapping.role));
                }
            }
        }
    }
    Ok(lines)
}

/// Compile the manifest's groups into the two SSO settings strings.
///
/// Static fallbacks are substituted when the corresponding dynamic output is
/// empty: `static_role_attribute_path` when no group maps to `GrafanaAdmin`,
/// `static_org_mapping` when no mapping line was produced.
///
/// The generated expression relies on the evaluator's left-to-right `||`
/// short-circuit, so when a user belongs to several admin groups the
/// first-listed group's clause decides; clause order is first-seen group
/// order.
pub fn compile(
    groups: &[Group],
    org_ids: &OrgIdTable,
    static_org_mapping: Option<&str>,
    static_role_attribute_path: Option<&str>,
) -> Result<CompiledSso, MappingError> {
    let admin_groups = collect_admin_groups(groups);
    let expr = build_admin_expression(&admin_groups)?;
    let lines = build_org_mapping(groups, org_ids)?;

    let role_attribute_path =
        expr.or_else(|| static_role_attribute_path.map(str::to_string));
    let org_mapping = if lines.is_empty() {
        static_org_mapping.map(str::to_string)
    } else {
        Some(lines.join("\n"))
    };

    Ok(CompiledSso {
        role_attribute_path,
        org_mapping,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str, mappings: &[(&str, Role)]) -> Group {
        Group {
            name: name.to_string(),
            org_mappings: mappings
                .iter()
                .map(|(org, role)| OrgMapping {
                    org: OrgSelector::from(org.to_string()),
                    role: *role,
                })
                .collect(),
        }
    }

    fn org_table(entries: &[(&str, i64)]) -> OrgIdTable {
        entries
            .iter()
            .map(|(name, id)| (name.to_string(), *id))
            .collect()
    }

    #[test]
    fn test_no_groups_no_fallback() {
        let out = compile(&[], &OrgIdTable::new(), None, None).unwrap();
        assert_eq!(out.role_attribute_path, None);
        assert_eq!(out.org_mapping, None);
    }

    #[test]
    fn test_wildcard_org_mapping() {
        let groups = [group("sre", &[("*", Role::Editor)])];
        let out = compile(&groups, &OrgIdTable::new(), None, None).unwrap();
        assert_eq!(out.org_mapping.as_deref(), Some("sre:*:Editor"));
        assert_eq!(out.role_attribute_path, None);
    }

    #[test]
    fn test_admin_mapping_excluded_from_org_mapping() {
        let groups = [group(
            "platform",
            &[("*", Role::GrafanaAdmin), ("teamA", Role::Viewer)],
        )];
        let out = compile(&groups, &org_table(&[("teamA", 5)]), None, None).unwrap();
        assert_eq!(
            out.role_attribute_path.as_deref(),
            Some("contains(groups[*], 'platform') && 'GrafanaAdmin' || 'None'")
        );
        assert_eq!(out.org_mapping.as_deref(), Some("platform:5:Viewer"));
    }

    #[test]
    fn test_unknown_org_is_fatal() {
        let groups = [group("sre", &[("ghost", Role::Editor)])];
        let err = compile(&groups, &org_table(&[("teamA", 5)]), None, None).unwrap_err();
        assert!(matches!(
            err,
            MappingError::UnknownOrganization { ref group, ref org, .. }
                if group == "sre" && org == "ghost"
        ));
    }

    #[test]
    fn test_multiple_admin_groups_preserve_order() {
        let groups = [
            group("alpha", &[("*", Role::GrafanaAdmin)]),
            group("beta", &[("*", Role::GrafanaAdmin)]),
        ];
        let out = compile(&groups, &OrgIdTable::new(), None, None).unwrap();
        assert_eq!(
            out.role_attribute_path.as_deref(),
            Some(
                "contains(groups[*], 'alpha') && 'GrafanaAdmin' || \
                 contains(groups[*], 'beta') && 'GrafanaAdmin' || 'None'"
            )
        );
    }

    #[test]
    fn test_admin_group_deduplicated_across_orgs() {
        // One group mapping to GrafanaAdmin in several orgs appears once.
        let groups = [group(
            "platform",
            &[("teamA", Role::GrafanaAdmin), ("teamB", Role::GrafanaAdmin)],
        )];
        assert_eq!(collect_admin_groups(&groups), vec!["platform"]);
    }

    #[test]
    fn test_mapping_lines_in_encounter_order() {
        let groups = [
            group("sre", &[("teamB", Role::Editor), ("teamA", Role::Viewer)]),
            group("dev", &[("teamA", Role::Editor)]),
        ];
        let table = org_table(&[("teamA", 2), ("teamB", 3)]);
        let lines = build_org_mapping(&groups, &table).unwrap();
        assert_eq!(lines, vec!["sre:3:Editor", "sre:2:Viewer", "dev:2:Editor"]);
    }

    #[test]
    fn test_static_fallbacks_used_when_dynamic_empty() {
        let out = compile(
            &[],
            &OrgIdTable::new(),
            Some("*:1:Viewer"),
            Some("'Viewer'"),
        )
        .unwrap();
        assert_eq!(out.org_mapping.as_deref(), Some("*:1:Viewer"));
        assert_eq!(out.role_attribute_path.as_deref(), Some("'Viewer'"));
    }

    #[test]
    fn test_dynamic_output_wins_over_fallback() {
        let groups = [group(
            "platform",
            &[("*", Role::GrafanaAdmin), ("*", Role::Editor)],
        )];
        let out = compile(
            &groups,
            &OrgIdTable::new(),
            Some("*:1:Viewer"),
            Some("'Viewer'"),
        )
        .unwrap();
        assert_eq!(
            out.role_attribute_path.as_deref(),
            Some("contains(groups[*], 'platform') && 'GrafanaAdmin' || 'None'")
        );
        assert_eq!(out.org_mapping.as_deref(), Some("platform:*:Editor"));
    }

    #[test]
    fn test_quoted_group_name_rejected() {
        let groups = [group("o'brien", &[("*", Role::GrafanaAdmin)])];
        let err = compile(&groups, &OrgIdTable::new(), None, None).unwrap_err();
        assert!(matches!(err, MappingError::InvalidGroupName(_)));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let groups = [
            group("platform", &[("*", Role::GrafanaAdmin)]),
            group("sre", &[("teamA", Role::Editor), ("*", Role::Viewer)]),
        ];
        let table = org_table(&[("teamA", 7), ("teamB", 8)]);
        let first = compile(&groups, &table, None, None).unwrap();
        let second = compile(&groups, &table, None, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_multiline_org_mapping_join() {
        let groups = [group(
            "sre",
            &[("teamA", Role::Editor), ("teamB", Role::Viewer)],
        )];
        let table = org_table(&[("teamA", 2), ("teamB", 3)]);
        let out = compile(&groups, &table, None, None).unwrap();
        assert_eq!(
            out.org_mapping.as_deref(),
            Some("sre:2:Editor\nsre:3:Viewer")
        );
    }

    #[test]
    fn test_org_selector_serde() {
        let mapping: OrgMapping =
            serde_yaml::from_str("{ org: \"*\", role: Editor }").unwrap();
        assert_eq!(mapping.org, OrgSelector::Wildcard);
        assert_eq!(mapping.role, Role::Editor);

        let mapping: OrgMapping =
            serde_yaml::from_str("{ org: teamA, role: GrafanaAdmin }").unwrap();
        assert_eq!(mapping.org.name(), Some("teamA"));
        assert_eq!(mapping.role, Role::GrafanaAdmin);
    }
}
