/// File name suffix identifying test adapter extensions.
pub const TEST_ADAPTER_SUFFIX: &str = "TestAdapter.dll";

/// Cache of extension paths discovered on the client side.
///
/// Shared between proxies as `Arc<RwLock<TestPluginCache>>`; the proxy only
/// reads it when negotiating extensions with the test host.
#[derive(Debug, Clone, Default)]
pub struct TestPluginCache {
    extensions: Vec<String>,
    default_extension_paths: Vec<String>,
}

impl TestPluginCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge discovered extension paths into the cache.
    ///
    /// Unless `skip_filter` is set only test adapters are kept. Paths already
    /// present are ignored.
    pub fn update_extensions(&mut self, paths: impl IntoIterator<Item = String>, skip_filter: bool) {
        for path in paths {
            if !skip_filter && !is_test_adapter(&path) {
                tracing::debug!(path = %path, "Skipping non-adapter extension");
                continue;
            }
            if !self.extensions.contains(&path) {
                self.extensions.push(path);
            }
        }
    }

    pub fn set_default_extension_paths(&mut self, paths: Vec<String>) {
        self.default_extension_paths = paths;
    }

    /// Every cached extension path.
    pub fn path_to_extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn default_extension_paths(&self) -> &[String] {
        &self.default_extension_paths
    }

    /// Cached paths that name a test adapter.
    pub fn adapter_extension_paths(&self) -> Vec<String> {
        self.extensions
            .iter()
            .filter(|p| is_test_adapter(p))
            .cloned()
            .collect()
    }

    /// Adapter paths followed by the default extension paths.
    pub fn all_default_extension_paths(&self) -> Vec<String> {
        let mut all = self.adapter_extension_paths();
        all.extend(self.default_extension_paths.iter().cloned());
        all
    }
}

fn is_test_adapter(path: &str) -> bool {
    let suffix_len = TEST_ADAPTER_SUFFIX.len();
    path.len() >= suffix_len
        && path.is_char_boundary(path.len() - suffix_len)
        && path[path.len() - suffix_len..].eq_ignore_ascii_case(TEST_ADAPTER_SUFFIX)
}
