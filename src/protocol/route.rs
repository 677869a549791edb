//! Route dictionary
//!
//! Bidirectional mapping between route names and small integer codes used to
//! compress repeated routes on the wire. The process-wide dictionary is
//! installed once at startup, before any traffic, and is read-only after.

use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Route dictionary errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Route not found in dictionary: {0}")]
    UnknownRoute(String),

    #[error("Route code not found in dictionary: {0}")]
    UnknownCode(u16),

    #[error("Route dictionary already installed")]
    AlreadyInstalled,
}

pub type RouteResult<T> = Result<T, RouteError>;

static ROUTES: OnceLock<RouteDictionary> = OnceLock::new();

/// Name <-> code mapping
#[derive(Debug, Clone, Default)]
pub struct RouteDictionary {
    codes: HashMap<String, u16>,
    routes: HashMap<u16, String>,
}

impl RouteDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dictionary from a name -> code table.
    ///
    /// Duplicated names or codes are logged and the later entry wins.
    pub fn from_table<I, S>(table: I) -> Self
    where
        I: IntoIterator<Item = (S, u16)>,
        S: AsRef<str>,
    {
        let mut dict = Self::new();
        for (route, code) in table {
            dict.insert(route.as_ref(), code);
        }
        dict
    }

    fn insert(&mut self, route: &str, code: u16) {
        let route = route.trim();

        if let Some(old_code) = self.codes.get(route).copied() {
            tracing::warn!("duplicated route (route: {}, code: {})", route, code);
            self.routes.remove(&old_code);
        }

        if let Some(old_route) = self.routes.get(&code).cloned() {
            tracing::warn!("duplicated route code (route: {}, code: {})", route, code);
            self.codes.remove(&old_route);
        }

        self.codes.insert(route.to_string(), code);
        self.routes.insert(code, route.to_string());
    }

    /// Code for a route name
    pub fn code(&self, route: &str) -> RouteResult<u16> {
        self.codes
            .get(route)
            .copied()
            .ok_or_else(|| RouteError::UnknownRoute(route.to_string()))
    }

    /// Route name for a code
    pub fn route(&self, code: u16) -> RouteResult<&str> {
        self.routes
            .get(&code)
            .map(|s| s.as_str())
            .ok_or(RouteError::UnknownCode(code))
    }

    pub fn contains(&self, route: &str) -> bool {
        self.codes.contains_key(route)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Entries sorted by code
    pub fn entries(&self) -> Vec<(u16, &str)> {
        let mut entries: Vec<_> = self
            .routes
            .iter()
            .map(|(code, route)| (*code, route.as_str()))
            .collect();
        entries.sort_unstable_by_key(|(code, _)| *code);
        entries
    }
}

/// Install the process-wide dictionary. May only succeed once.
pub fn install(dict: RouteDictionary) -> RouteResult<()> {
    tracing::info!("Installing route dictionary with {} routes", dict.len());
    ROUTES.set(dict).map_err(|_| RouteError::AlreadyInstalled)
}

/// The process-wide dictionary, or an empty one if none was installed
pub fn routes() -> &'static RouteDictionary {
    static EMPTY: OnceLock<RouteDictionary> = OnceLock::new();
    ROUTES
        .get()
        .unwrap_or_else(|| EMPTY.get_or_init(RouteDictionary::new))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_both_directions() {
        let dict = RouteDictionary::from_table([("room.join", 7), ("room.leave", 8)]);
        assert_eq!(dict.code("room.join").unwrap(), 7);
        assert_eq!(dict.route(8).unwrap(), "room.leave");
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn test_missing_entries_are_errors() {
        let dict = RouteDictionary::from_table([("room.join", 7)]);
        assert_eq!(
            dict.code("room.kick"),
            Err(RouteError::UnknownRoute("room.kick".to_string()))
        );
        assert_eq!(dict.route(9), Err(RouteError::UnknownCode(9)));
    }

    #[test]
    fn test_names_are_trimmed() {
        let dict = RouteDictionary::from_table([("  chat.send ", 3)]);
        assert!(dict.contains("chat.send"));
        assert_eq!(dict.route(3).unwrap(), "chat.send");
    }

    #[test]
    fn test_duplicate_name_keeps_latest() {
        let dict = RouteDictionary::from_table([("room.join", 1), ("room.join", 2)]);
        assert_eq!(dict.code("room.join").unwrap(), 2);
        assert!(dict.route(1).is_err());
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_duplicate_code_keeps_latest() {
        let dict = RouteDictionary::from_table([("room.join", 1), ("room.leave", 1)]);
        assert_eq!(dict.route(1).unwrap(), "room.leave");
        assert!(!dict.contains("room.join"));
    }

    #[test]
    fn test_entries_sorted_by_code() {
        let dict = RouteDictionary::from_table([("b", 9), ("a", 2), ("c", 5)]);
        assert_eq!(dict.entries(), vec![(2, "a"), (5, "c"), (9, "b")]);
    }

    #[test]
    fn test_routes_defaults_to_empty() {
        // Nothing in this test binary installs a dictionary
        assert!(routes().code("anything").is_err());
    }
}
