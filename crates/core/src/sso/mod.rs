//! SSO group-to-role mapping compiler.
//!
//! Turns the manifest's identity-provider groups into the two string-valued
//! settings Grafana's OAuth integration consumes:
//! 1. **`role_attribute_path`** -- a JMESPath expression electing the
//!    `GrafanaAdmin` super-role based on group membership.
//! 2. **`org_mapping`** -- newline-separated `group:org:role` entries
//!    assigning per-organization roles.

pub mod compiler;
pub mod expression;

pub use compiler::{compile, CompiledSso, Group, OrgIdTable, OrgMapping, OrgSelector, Role};
pub use expression::AdminExpression;
