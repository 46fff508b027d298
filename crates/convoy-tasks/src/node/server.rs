use async_trait::async_trait;
use convoy_server::actor::ActorHandle;
use tokio::sync::oneshot;

use crate::error::{PersistentError, PersistentResult};
use crate::id::NodeId;
use crate::node::{NodeActor, NodeEvent};
use crate::transport::{RequestHandler, TransportRequest, TransportResponse};

/// Serves transport requests addressed to a node.
pub struct NodeRequestHandler {
    node_id: NodeId,
    handle: ActorHandle<NodeActor>,
}

impl NodeRequestHandler {
    pub fn new(node_id: NodeId, handle: ActorHandle<NodeActor>) -> Self {
        Self { node_id, handle }
    }

    fn closed(&self) -> PersistentError {
        PersistentError::ConnectionClosed(self.node_id.clone())
    }
}

#[async_trait]
impl RequestHandler for NodeRequestHandler {
    async fn handle(&self, request: TransportRequest) -> PersistentResult<TransportResponse> {
        if self.handle.is_stopped() {
            return Err(self.closed());
        }
        match request {
            TransportRequest::Ping { .. } => Ok(TransportResponse::Pong),
            request => {
                let (tx, rx) = oneshot::channel();
                let event = NodeEvent::MasterRequest {
                    request,
                    result: tx,
                };
                self.handle.send(event).await.map_err(|_| self.closed())?;
                rx.await.map_err(|_| self.closed())?
            }
        }
    }
}
