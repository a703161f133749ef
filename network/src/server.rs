use crate::framing;
use crate::messages::{ConnectPayload, Envelope, Message, Payload, SignedMessage};
use crate::node::{NodeInfo, NodeRole, NodeTable};
use crate::NetworkError;
use async_trait::async_trait;
use privbill_core::crypto::{KeyPair, PublicKey, Signature};
use privbill_core::ClientId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

/// Billing facts a node advertises when it connects. Edges fill in the
/// cycle length; cores leave it empty.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BillingState {
    pub cycle_length: Option<usize>,
}

/// Per-server network state, owned by the message loop and carried
/// explicitly: local identity, signing keys, the member table, and the
/// advertised billing state.
pub struct NetworkCore {
    address: SocketAddr,
    keys: KeyPair,
    role: NodeRole,
    pub members: NodeTable,
    pub billing_state: BillingState,
}

impl NetworkCore {
    /// Generate signing keys and register the local node.
    pub fn new(address: SocketAddr, role: NodeRole) -> Self {
        let keys = KeyPair::generate();
        let mut members = NodeTable::new(address);
        members.insert(NodeInfo {
            address,
            public_key: keys.public_key(),
            role,
        });
        NetworkCore {
            address,
            keys,
            role,
            members,
            billing_state: BillingState::default(),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    pub fn id(&self) -> ClientId {
        self.public_key().node_id()
    }

    pub fn local_info(&self) -> NodeInfo {
        NodeInfo {
            address: self.address,
            public_key: self.public_key(),
            role: self.role,
        }
    }

    pub fn sign(&self, message: &Message) -> Result<SignedMessage, NetworkError> {
        let bytes = bincode::serialize(message)?;
        let signature = self.keys.sign(&bytes);
        Ok(SignedMessage {
            message: bytes,
            signature,
        })
    }

    /// Send a signed message and await the reply frame.
    pub async fn send(
        &self,
        body: Payload,
        target: SocketAddr,
    ) -> Result<Option<Message>, NetworkError> {
        debug!(kind = body.kind(), %target, "sending");
        let message = Message {
            reply_address: self.address,
            body,
        };
        let envelope = Envelope::Signed(self.sign(&message)?);
        match framing::request(target, &envelope).await? {
            None => Ok(None),
            Some(Envelope::Plain(reply)) => Ok(Some(reply)),
            Some(Envelope::Signed(signed)) => Ok(Some(signed.decode()?)),
        }
    }

    /// Send to many targets, logging failures instead of aborting.
    pub async fn broadcast(
        &self,
        body: Payload,
        targets: impl IntoIterator<Item = SocketAddr>,
    ) {
        for target in targets {
            if let Err(e) = self.send(body.clone(), target).await {
                warn!(%target, "broadcast send failed: {e}");
            }
        }
    }

    pub fn connect_payload(&self) -> ConnectPayload {
        ConnectPayload {
            public_key: self.public_key(),
            role: self.role,
            network_state: self.members.snapshot(),
            billing_state: self.billing_state.clone(),
        }
    }

    /// Introduce ourselves (and our view of the network) to `target`.
    pub async fn send_connect(&self, target: SocketAddr) -> Result<(), NetworkError> {
        self.send(Payload::Connect(self.connect_payload()), target)
            .await
            .map(|_| ())
    }
}

/// A role server attached to the overlay: the shared network state plus
/// the role's message handlers.
#[async_trait]
pub trait BillingServer: Send + 'static {
    fn network(&self) -> &NetworkCore;

    fn network_mut(&mut self) -> &mut NetworkCore;

    /// Hook invoked for every node added to the table; roles may layer
    /// bookkeeping on top.
    fn register_node(&mut self, node: NodeInfo) {
        self.network_mut().members.insert(node);
    }

    /// Handle one verified-or-gated message. Returning a message sends it
    /// as the reply for replying payloads.
    async fn dispatch(
        &mut self,
        message: Message,
        origin: Option<NodeInfo>,
    ) -> Result<Option<Message>, NetworkError>;
}

/// Membership gossip. Register the sender, then diff its view of the
/// network against ours: every address we did not know gets recorded and
/// receives our own `connect`, the sender included when it was new to us.
/// The exchange reaches a fixed point once every pair's views agree.
pub async fn handle_connect<S: BillingServer + ?Sized>(
    server: &mut S,
    reply_address: SocketAddr,
    connect: ConnectPayload,
) -> Result<(), NetworkError> {
    let known: HashSet<SocketAddr> = server.network().members.addresses().collect();

    let origin = NodeInfo {
        address: reply_address,
        public_key: connect.public_key,
        role: connect.role,
    };
    debug!(address = %reply_address, role = ?connect.role, "connect received");
    server.register_node(origin);

    for node in connect.network_state.values() {
        if known.contains(&node.address) || node.address == reply_address {
            continue;
        }
        server.register_node(node.clone());
        if let Err(e) = server.network().send_connect(node.address).await {
            warn!(address = %node.address, "connect to discovered node failed: {e}");
        }
    }

    if !known.contains(&reply_address) {
        if let Err(e) = server.network().send_connect(reply_address).await {
            warn!(address = %reply_address, "connect back to origin failed: {e}");
        }
    }
    Ok(())
}

struct Incoming {
    message: Message,
    signed: Option<(Vec<u8>, Signature)>,
}

/// Serve the overlay protocol on `listener` until `shutdown` fires.
///
/// Replying handlers run inline so the reply goes out on the request
/// socket. Everything else is acknowledged with an empty frame first and
/// handed to a single worker task, so a slow handler (key generation, the
/// billing kernel) never stalls a sender's round-trip.
pub async fn run<S: BillingServer>(
    server: Arc<Mutex<S>>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), NetworkError> {
    let (job_tx, mut job_rx) = mpsc::channel::<Incoming>(256);

    let worker = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            while let Some(job) = job_rx.recv().await {
                let kind = job.message.body.kind();
                let mut guard = server.lock().await;
                if let Err(e) = process(&mut *guard, job).await {
                    // failure barrier: the loop must survive bad input
                    error!(kind, "handler failed: {e}");
                }
            }
        })
    };

    info!(address = %listener.local_addr()?, "server listening");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    if let Err(e) = handle_connection(&server, &job_tx, stream).await {
                        debug!("connection failed: {e}");
                    }
                }
                Err(e) => warn!("accept failed: {e}"),
            },
        }
    }

    drop(job_tx);
    let _ = worker.await;
    let stopped_address = self_addr(&server).await;
    info!(address = %stopped_address, "server stopped");
    Ok(())
}

async fn self_addr<S: BillingServer>(server: &Arc<Mutex<S>>) -> SocketAddr {
    server.lock().await.network().address()
}

async fn handle_connection<S: BillingServer>(
    server: &Arc<Mutex<S>>,
    job_tx: &mpsc::Sender<Incoming>,
    mut stream: TcpStream,
) -> Result<(), NetworkError> {
    let Some(bytes) = framing::read_frame(&mut stream).await? else {
        return Ok(());
    };

    let incoming = match Envelope::from_bytes(&bytes)? {
        Envelope::Plain(message) => Incoming {
            message,
            signed: None,
        },
        Envelope::Signed(signed) => Incoming {
            message: signed.decode()?,
            signed: Some((signed.message, signed.signature)),
        },
    };

    if incoming.message.body.replies() {
        let mut guard = server.lock().await;
        let outcome = process(&mut *guard, incoming).await;
        drop(guard);
        match outcome {
            Ok(Some(reply)) => {
                framing::write_frame(&mut stream, &Envelope::Plain(reply).to_bytes()?).await?
            }
            Ok(None) => framing::write_empty(&mut stream).await?,
            Err(e) => {
                // the sender still gets its reply frame
                framing::write_empty(&mut stream).await?;
                return Err(e);
            }
        }
    } else {
        // acknowledge before processing; a sender's round-trip must never
        // wait on a handler
        framing::write_empty(&mut stream).await?;
        if job_tx.send(incoming).await.is_err() {
            warn!("worker queue closed, dropping message");
        }
    }
    Ok(())
}

async fn process<S: BillingServer + ?Sized>(
    server: &mut S,
    incoming: Incoming,
) -> Result<Option<Message>, NetworkError> {
    let Incoming { message, signed } = incoming;

    let origin = server
        .network()
        .members
        .get(message.reply_address)
        .cloned();

    // fails closed: no signature, unknown origin, or a bad signature all
    // count as unverified
    let verified = match (&signed, &origin) {
        (Some((bytes, signature)), Some(node)) => node.public_key.verify(bytes, signature),
        _ => false,
    };
    if message.body.requires_verification() && !verified {
        return Err(NetworkError::InvalidSignature(message.body.kind()));
    }

    debug!(kind = message.body.kind(), from = %message.reply_address, "dispatching");
    server.dispatch(message, origin).await
}
