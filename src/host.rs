/// Engines the binding layer hands work to but does not implement. An
/// embedder supplies its own through [`crate::Realm::with_host`].
pub trait HostCollaborators {
    /// Runs the markup rewriter over `input` for the registered selectors.
    fn rewrite_markup(&self, input: &str, selectors: &[String]) -> Result<String, String> {
        let _ = selectors;
        Ok(input.to_string())
    }

    /// Transpiles `code` written for `loader` into plain script.
    fn transpile(&self, code: &str, loader: &str) -> Result<String, String> {
        let _ = loader;
        Ok(code.to_string())
    }
}

/// Collaborator that hands every input back unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughHost;

impl HostCollaborators for PassthroughHost {}
