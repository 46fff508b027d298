use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::mpsc;

use crate::error::{PersistentError, PersistentResult};
use crate::id::NodeId;
use crate::transport::{
    ConnectionEvent, RequestHandler, Transport, TransportRequest, TransportResponse,
};

#[derive(Default)]
struct LocalNetwork {
    handlers: HashMap<NodeId, Arc<dyn RequestHandler>>,
    unresponsive: HashSet<NodeId>,
    subscribers: Vec<mpsc::UnboundedSender<ConnectionEvent>>,
}

impl LocalNetwork {
    fn notify(&mut self, event: ConnectionEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

/// An in-process transport connecting all nodes of a test cluster.
/// It supports fault injection so that node loss can be simulated.
#[derive(Default)]
pub struct LocalTransport {
    network: Mutex<LocalNetwork>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects the node to the network.
    pub fn connect(&self, node_id: NodeId, handler: Arc<dyn RequestHandler>) {
        let mut network = self.network.lock().unwrap_or_else(|e| e.into_inner());
        info!("node {node_id} connected");
        network.unresponsive.remove(&node_id);
        network.handlers.insert(node_id.clone(), handler);
        network.notify(ConnectionEvent::Connected(node_id));
    }

    /// Closes all connections to the node.
    /// Requests to the node fail immediately until it connects again.
    pub fn disconnect(&self, node_id: &NodeId) {
        let mut network = self.network.lock().unwrap_or_else(|e| e.into_inner());
        if network.handlers.remove(node_id).is_some() {
            info!("node {node_id} disconnected");
            network.notify(ConnectionEvent::Closed(node_id.clone()));
        }
    }

    /// Makes requests to the node hang without closing the connection.
    pub fn set_unresponsive(&self, node_id: &NodeId, unresponsive: bool) {
        let mut network = self.network.lock().unwrap_or_else(|e| e.into_inner());
        if unresponsive {
            network.unresponsive.insert(node_id.clone());
        } else {
            network.unresponsive.remove(node_id);
        }
    }

    pub fn is_connected(&self, node_id: &NodeId) -> bool {
        let network = self.network.lock().unwrap_or_else(|e| e.into_inner());
        network.handlers.contains_key(node_id)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(
        &self,
        node_id: &NodeId,
        request: TransportRequest,
    ) -> PersistentResult<TransportResponse> {
        let handler = {
            let network = self.network.lock().unwrap_or_else(|e| e.into_inner());
            let Some(handler) = network.handlers.get(node_id) else {
                return Err(PersistentError::ConnectionClosed(node_id.clone()));
            };
            if network.unresponsive.contains(node_id) {
                None
            } else {
                Some(Arc::clone(handler))
            }
        };
        match handler {
            Some(handler) => handler.handle(request).await,
            None => {
                debug!("dropping {} request to unresponsive node {node_id}", request.name());
                futures::future::pending().await
            }
        }
    }

    fn subscribe_connections(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut network = self.network.lock().unwrap_or_else(|e| e.into_inner());
        network.subscribers.push(tx);
        rx
    }
}
