//! Builds hub connections wired to the shared transport and event router.

use std::sync::Arc;

use chathub_shared::HubName;
use serde_json::Value;
use url::Url;

use super::connection::{AccessTokenFactory, HubConnection, ReconnectConfig};
use super::router::EventRouter;
use super::transport::HubTransport;
use crate::error::Result;

pub struct ConnectionFactory {
    hub_base_url: Url,
    transport: Arc<dyn HubTransport>,
    reconnect: ReconnectConfig,
    router: Arc<EventRouter>,
}

impl ConnectionFactory {
    /// Fails if `hub_base_url` is not an absolute URL.
    pub fn new(
        hub_base_url: &str,
        transport: Arc<dyn HubTransport>,
        reconnect: ReconnectConfig,
        router: Arc<EventRouter>,
    ) -> Result<Self> {
        // A trailing slash makes `join` append instead of replacing the last segment
        let mut base = hub_base_url.trim_end_matches('/').to_string();
        base.push('/');
        Ok(Self {
            hub_base_url: Url::parse(&base)?,
            transport,
            reconnect,
            router,
        })
    }

    pub fn hub_url(&self, hub: HubName) -> Result<Url> {
        Ok(self.hub_base_url.join(hub.path())?)
    }

    /// Build a connection for `hub`. Nothing is opened here; `supplier` is
    /// consulted on every (re)connect of the returned connection.
    pub fn create(
        &self,
        hub: HubName,
        supplier: Arc<dyn AccessTokenFactory>,
    ) -> Result<Arc<HubConnection>> {
        let url = self.hub_url(hub)?;
        let router = self.router.clone();
        tracing::debug!(%hub, %url, "creating hub connection");
        Ok(HubConnection::new(
            hub,
            url,
            self.transport.clone(),
            supplier,
            self.reconnect.clone(),
            Arc::new(move |hub: HubName, target: &str, arguments: Vec<Value>| {
                router.dispatch(hub, target, arguments)
            }),
        ))
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::testing::MockTransport;

    fn factory(base: &str) -> Result<ConnectionFactory> {
        ConnectionFactory::new(
            base,
            Arc::new(MockTransport::new()),
            MockTransport::fast_reconnect(),
            Arc::new(EventRouter::new()),
        )
    }

    #[test]
    fn hub_urls_append_the_path_suffix() {
        for base in ["http://localhost:5000/hubs", "http://localhost:5000/hubs/"] {
            let factory = factory(base).unwrap();
            assert_eq!(
                factory.hub_url(HubName::Notification).unwrap().as_str(),
                "http://localhost:5000/hubs/notification"
            );
        }
    }

    #[test]
    fn bad_base_url_fails_synchronously() {
        assert!(factory("not a url").is_err());
    }

    #[tokio::test]
    async fn created_connection_starts_disconnected() {
        let factory = factory("https://chat.example.com/hubs").unwrap();
        let conn = factory
            .create(HubName::Group, Arc::new(|| Some("t".to_string())))
            .unwrap();
        assert_eq!(conn.hub(), HubName::Group);
        assert!(!conn.state().is_connected());
        assert_eq!(conn.url().as_str(), "https://chat.example.com/hubs/group");
    }
}
