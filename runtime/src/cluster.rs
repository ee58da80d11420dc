//! Static cluster membership and token ownership.
//!
//! A [`Cluster`] is an immutable snapshot: the local address plus the seed
//! addresses, deduplicated and sorted so every node derives the same order
//! from the same set. The owner of a token is the node at index
//! `jump::hash(sum64(token), len)`. Membership changes are modelled by
//! building a new `Cluster` and swapping it in, never by mutating one that is
//! already shared.
//!
//! # Example
//!
//! ```
//! use mnemosyne_runtime::cluster::Cluster;
//!
//! let cluster = Cluster::new("10.0.0.2:8080", ["10.0.0.3:8080", "10.0.0.1:8080"]);
//! let addrs: Vec<_> = cluster.nodes().iter().map(|n| n.addr()).collect();
//! assert_eq!(addrs, ["10.0.0.1:8080", "10.0.0.2:8080", "10.0.0.3:8080"]);
//!
//! let owner = cluster.ownership("some-token").unwrap();
//! assert_eq!(owner.is_self, owner.node.addr() == "10.0.0.2:8080");
//! ```

use mnemosyne_core::{SessionService, jump};
use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building or querying a cluster.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// No node has a non-empty address.
    #[error("cluster has no nodes")]
    Empty,

    /// The hash produced an index past the end of the node list.
    #[error("bucket {bucket} out of range for {nodes} nodes")]
    BucketOutOfRange {
        /// Computed bucket.
        bucket: u32,
        /// Number of nodes.
        nodes: usize,
    },

    /// A peer could not be dialed.
    #[error("failed to dial cluster node {addr}: {reason}")]
    Dial {
        /// Peer address.
        addr: String,
        /// Underlying cause.
        reason: String,
    },

    /// The address is not a member of this cluster.
    #[error("{0} is not a member of the cluster")]
    UnknownNode(String),
}

/// Future returned by [`Dialer::dial`].
pub type DialFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Arc<dyn SessionService>, ClusterError>> + Send + 'a>>;

/// Opens the RPC client used to forward calls to a peer.
pub trait Dialer: Send + Sync {
    /// Connect to `addr`.
    ///
    /// # Errors
    ///
    /// [`ClusterError::Dial`] if the peer cannot be reached.
    fn dial<'a>(&'a self, addr: &'a str) -> DialFuture<'a>;
}

/// One cluster member.
#[derive(Clone)]
pub struct Node {
    addr: String,
    client: Option<Arc<dyn SessionService>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("addr", &self.addr)
            .field("connected", &self.client.is_some())
            .finish()
    }
}

impl Node {
    /// Address, used both as identity and dial target.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Peer client; `None` for the local node or before [`Cluster::connect`].
    #[must_use]
    pub const fn client(&self) -> Option<&Arc<dyn SessionService>> {
        self.client.as_ref()
    }
}

/// Result of [`Cluster::ownership`].
#[derive(Debug, Clone, Copy)]
pub struct Ownership<'a> {
    /// Node owning the token.
    pub node: &'a Node,
    /// Whether that node is the local one.
    pub is_self: bool,
}

/// Sorted, immutable cluster membership.
#[derive(Debug, Clone)]
pub struct Cluster {
    listen: String,
    nodes: Vec<Node>,
}

impl Cluster {
    /// Build the membership from the local address and the seeds.
    ///
    /// Empty addresses are skipped and duplicates collapse into one node.
    /// Nothing is dialed yet.
    #[must_use]
    pub fn new<I, S>(listen: impl Into<String>, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let listen = listen.into();
        let mut addrs: Vec<String> = seeds
            .into_iter()
            .map(Into::into)
            .chain(std::iter::once(listen.clone()))
            .filter(|addr| !addr.is_empty())
            .collect();
        addrs.sort();
        addrs.dedup();

        Self {
            listen,
            nodes: addrs
                .into_iter()
                .map(|addr| Node { addr, client: None })
                .collect(),
        }
    }

    /// Cluster made of the local node only.
    #[must_use]
    pub fn single(listen: impl Into<String>) -> Self {
        Self::new(listen, std::iter::empty::<String>())
    }

    /// Dial every node except the local one.
    ///
    /// # Errors
    ///
    /// Fails on the first peer that cannot be dialed; the cluster must not be
    /// used after a failed connect.
    pub async fn connect(&mut self, dialer: &dyn Dialer) -> Result<(), ClusterError> {
        for (index, node) in self.nodes.iter_mut().enumerate() {
            if node.addr == self.listen {
                continue;
            }
            tracing::debug!(address = %node.addr, index, "cluster node attempt to connect");
            node.client = Some(dialer.dial(&node.addr).await?);
            tracing::debug!(address = %node.addr, index, "cluster node connection success");
        }
        Ok(())
    }

    /// Attach an already established client to the node at `addr`.
    ///
    /// # Errors
    ///
    /// [`ClusterError::UnknownNode`] if `addr` is not a member.
    pub fn set_client(
        &mut self,
        addr: &str,
        client: Arc<dyn SessionService>,
    ) -> Result<(), ClusterError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|node| node.addr == addr)
            .ok_or_else(|| ClusterError::UnknownNode(addr.to_string()))?;
        node.client = Some(client);
        Ok(())
    }

    /// Node owning `access_token`.
    ///
    /// # Errors
    ///
    /// [`ClusterError::Empty`] for a cluster without nodes.
    pub fn ownership(&self, access_token: &str) -> Result<Ownership<'_>, ClusterError> {
        let buckets = u32::try_from(self.nodes.len())
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or(ClusterError::Empty)?;
        let bucket = jump::hash_str(access_token, buckets);
        let node = self.get(bucket).ok_or(ClusterError::BucketOutOfRange {
            bucket,
            nodes: self.nodes.len(),
        })?;
        Ok(Ownership {
            node,
            is_self: node.addr == self.listen,
        })
    }

    /// Node at a bucket index.
    #[must_use]
    pub fn get(&self, bucket: u32) -> Option<&Node> {
        self.nodes.get(usize::try_from(bucket).ok()?)
    }

    /// All nodes, sorted by address.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All nodes except the local one.
    pub fn external_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| node.addr != self.listen)
    }

    /// Number of nodes, which is also the number of hash buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the cluster has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Local address.
    #[must_use]
    pub fn listen(&self) -> &str {
        &self.listen
    }
}
