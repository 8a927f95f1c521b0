//! Naming contract for proxy artifacts.
//!
//! Site files, cache zones and upstream blocks are named from the project
//! and cluster names. These strings are persisted in nginx configuration,
//! so they must stay stable across releases.

/// Trailing marker written after every generated upstream block.
pub const GENERATED_MARKER: &str = "# Generated by berth ereased if you edit on next deploy";

/// `{project}_{cluster}`
pub fn site_filename(project_name: &str, cluster_name: &str) -> String {
    format!("{project_name}_{cluster_name}")
}

/// `cache_{project}`
pub fn cache_name(project_name: &str) -> String {
    format!("cache_{project_name}")
}

/// `upstream_{project}`
pub fn upstream_name(project_name: &str) -> String {
    format!("upstream_{project_name}")
}

/// Render an `ip_hash` upstream block over loopback ports, followed by the
/// generated marker.
pub fn generate_upstream(name: &str, ports: &[u16]) -> String {
    let servers = ports
        .iter()
        .map(|port| format!("server 127.0.0.1:{port};"))
        .collect::<Vec<_>>()
        .join("\n\t");
    format!("upstream {name} {{\n\tip_hash;\n\t{servers}\n}}{GENERATED_MARKER}")
}
