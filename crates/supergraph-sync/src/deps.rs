//! Pre-flight check for external tools.

/// Answers whether a tool can be invoked by name.
pub trait ToolProbe: Send + Sync {
    fn is_available(&self, tool: &str) -> bool;
}

/// Looks tools up on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathProbe;

impl ToolProbe for PathProbe {
    fn is_available(&self, tool: &str) -> bool {
        which::which(tool).is_ok()
    }
}

/// Returns the tools from `required` that the probe cannot find, in order.
pub fn missing_tools(probe: &dyn ToolProbe, required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|tool| !probe.is_available(tool))
        .cloned()
        .collect()
}

/// Installation hints for the given tools, one line per tool.
pub fn install_guidance(tools: &[String]) -> String {
    tools
        .iter()
        .map(|tool| {
            let hint = match tool.as_str() {
                "rover" => "curl -sSL https://rover.apollo.dev/nix/latest | sh",
                "gcloud" | "gsutil" => "install the Google Cloud SDK: https://cloud.google.com/sdk/docs/install",
                _ => "install it and make sure it is on PATH",
            };
            format!("{}: {}", tool, hint)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
