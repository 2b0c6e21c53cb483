//! User agents presented to the portal and the catalog.

/// Identifies the harvester to the catalog it publishes into.
pub const USER_AGENT: &str = "govharvest/0.1 (open data mirror)";

/// Desktop Chrome. The portal's data API rejects unknown clients.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Portal requests default to the browser agent. `"harvester"` selects
/// [`USER_AGENT`]; any other value is sent verbatim.
pub fn resolve_user_agent(config: Option<&str>) -> String {
    match config.map(str::trim) {
        None | Some("") | Some("browser") => BROWSER_USER_AGENT.to_string(),
        Some("harvester") => USER_AGENT.to_string(),
        Some(custom) => custom.to_string(),
    }
}
