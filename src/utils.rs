//! Utility functions.

use uuid::Uuid;

/// Namespace for generated component GUIDs.
pub const COMPONENT_GUID_NAMESPACE: Uuid = Uuid::from_u128(0x3064e5c6_fb63_4fe9_ac49_e446a792efa5);

/// Name-based GUID in registry format, e.g. `{5B9E...}`. The same namespace and
/// name always produce the same GUID.
pub fn generate_guid(namespace: &Uuid, name: &str) -> String {
    let guid = Uuid::new_v5(namespace, name.as_bytes());
    format!("{{{}}}", guid.hyphenated().to_string().to_ascii_uppercase())
}

/// Stable GUID for a component whose id was left to the linker.
pub fn component_guid(directory: &str, component: &str) -> String {
    let name = format!("{directory}/{component}").to_ascii_lowercase();
    generate_guid(&COMPONENT_GUID_NAMESPACE, &name)
}

/// Cultures compare case-insensitively.
pub fn culture_matches(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Splits a `;` separated culture list, dropping empty entries.
pub fn split_cultures(list: &str) -> Vec<String> {
    list.split([';', ','])
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}
