//! Route resolution seam. Route tables live outside the dispatch core.

use std::collections::HashMap;

use crate::endpoint::Endpoint;

pub trait RouteResolver: Send + Sync {
    /// Endpoint registered for `path` together with the pattern it matched.
    fn find_endpoint(&self, path: &str) -> Option<(Endpoint, String)>;

    /// Values of the variables declared in `pattern`, taken from `path`.
    fn collect_path_variables(&self, path: &str, pattern: &str) -> HashMap<String, String>;
}
