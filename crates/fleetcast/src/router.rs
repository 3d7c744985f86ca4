//! Topic routing.
//!
//! Every inbound delivery is dispatched by exact topic match. The table
//! is built once from [`Topics`] and doubles as the subscription list.

use std::collections::HashMap;

use crate::config::Topics;

/// Which handler a topic feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Bootup,
    Heartbeat,
    Offline,
    Canvas,
}

/// Exact-match topic → [`Route`] table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
}

impl RouteTable {
    pub fn from_topics(topics: &Topics) -> Self {
        let routes = [
            (topics.bootup.clone(), Route::Bootup),
            (topics.heartbeat.clone(), Route::Heartbeat),
            (topics.offline.clone(), Route::Offline),
            (topics.canvas.clone(), Route::Canvas),
        ]
        .into_iter()
        .collect();
        Self { routes }
    }

    pub fn route(&self, topic: &str) -> Option<Route> {
        self.routes.get(topic).copied()
    }

    /// Every routed topic, sorted.
    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_production_topics() {
        let table = RouteTable::from_topics(&Topics::production());
        assert_eq!(table.route("dev_bootup"), Some(Route::Bootup));
        assert_eq!(table.route("dev_heartbeat"), Some(Route::Heartbeat));
        assert_eq!(table.route("device_offline"), Some(Route::Offline));
        assert_eq!(table.route("etch_sketch"), Some(Route::Canvas));
    }

    #[test]
    fn test_no_prefix_or_wildcard_matching() {
        let table = RouteTable::from_topics(&Topics::production());
        assert_eq!(table.route("dev_bootup/extra"), None);
        assert_eq!(table.route("weather/94107"), None);
        assert_eq!(table.route("debug_dev_bootup"), None);
    }

    #[test]
    fn test_topics_sorted() {
        let table = RouteTable::from_topics(&Topics::debug());
        assert_eq!(
            table.topics(),
            vec![
                "debug_dev_bootup",
                "debug_dev_heartbeat",
                "debug_device_offline",
                "debug_etch_sketch",
            ]
        );
    }
}
