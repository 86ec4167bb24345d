//! Tree traversals: by node and by file/directory boundary.
//!
//! Two walk modes, each in a sequential and a concurrent flavour:
//!
//! - **Node walk** — pre-order over every node, passing the accumulated
//!   path (concatenated fork prefixes from the walk root) and the node.
//! - **Path walk** — yields each distinct file (`is_dir == false`, the
//!   node carries the Value flag) and `is_dir == true` at every
//!   path-separator boundary inside a fork prefix. No path is yielded
//!   twice.
//!
//! The sequential walkers visit forks in ascending key order, so their
//! output order is deterministic. The `_async` variants descend sibling
//! subtrees concurrently with first-error semantics and observe a
//! cancellation token between recursion frames; no ordering holds
//! between siblings.
//!
//! Callbacks receive the path as a borrow scoped to the call; a callback
//! that keeps paths clones them. Returning an error aborts the walk and
//! cancels sibling branches.

use atoll_store::Loader;
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use tokio_util::sync::CancellationToken;

use crate::PATH_SEPARATOR;
use crate::error::ManifestError;
use crate::node::Node;

type Result<T> = std::result::Result<T, ManifestError>;

/// Callback for node walks: accumulated path and the visited node.
pub type WalkNodeFn = dyn Fn(&[u8], &Node) -> Result<()> + Send + Sync;

/// Callback for path walks: the path and whether it names a directory.
pub type WalkPathFn = dyn Fn(&[u8], bool) -> Result<()> + Send + Sync;

impl Node {
    /// Visit every node under `root` in pre-order, ascending fork-key
    /// order.
    pub async fn walk_nodes(
        &mut self,
        root: &[u8],
        l: Option<&dyn Loader>,
        f: &WalkNodeFn,
    ) -> Result<()> {
        let node = self.lookup_node_mut(root, l).await?;
        node.walk_nodes_seq(root.to_vec(), l, f).await
    }

    /// [`walk_nodes`](Node::walk_nodes) with sibling subtrees descended
    /// concurrently and a cancellation signal.
    pub async fn walk_nodes_async(
        &mut self,
        root: &[u8],
        l: Option<&dyn Loader>,
        f: &WalkNodeFn,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let node = self.lookup_node_mut(root, l).await?;
        node.walk_nodes_conc(root.to_vec(), l, f, cancel).await
    }

    /// Visit every file and directory boundary under `root`, ascending
    /// fork-key order.
    pub async fn walk_paths(
        &mut self,
        root: &[u8],
        l: Option<&dyn Loader>,
        f: &WalkPathFn,
    ) -> Result<()> {
        let node = self.lookup_node_mut(root, l).await?;
        node.walk_paths_seq(root.to_vec(), Vec::new(), l, f).await
    }

    /// [`walk_paths`](Node::walk_paths) with sibling subtrees descended
    /// concurrently and a cancellation signal.
    pub async fn walk_paths_async(
        &mut self,
        root: &[u8],
        l: Option<&dyn Loader>,
        f: &WalkPathFn,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let node = self.lookup_node_mut(root, l).await?;
        node.walk_paths_conc(root.to_vec(), Vec::new(), l, f, cancel)
            .await
    }

    fn walk_nodes_seq<'a>(
        &'a mut self,
        path: Vec<u8>,
        l: Option<&'a dyn Loader>,
        f: &'a WalkNodeFn,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            self.materialize(l).await?;
            f(&path, self)?;
            for fork in self.forks_mut().values_mut() {
                let mut next = path.clone();
                next.extend_from_slice(&fork.prefix);
                fork.node.walk_nodes_seq(next, l, f).await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn walk_nodes_conc<'a>(
        &'a mut self,
        path: Vec<u8>,
        l: Option<&'a dyn Loader>,
        f: &'a WalkNodeFn,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if cancel.is_cancelled() {
                return Err(ManifestError::Cancelled);
            }
            self.materialize(l).await?;
            f(&path, self)?;
            try_join_all(self.forks_mut().values_mut().map(|fork| {
                let mut next = path.clone();
                next.extend_from_slice(&fork.prefix);
                fork.node.walk_nodes_conc(next, l, f, cancel)
            }))
            .await?;
            Ok(())
        }
        .boxed()
    }

    /// Walk one node of the path walk: report directory boundaries found
    /// inside the incoming `prefix`, then the node itself if it holds a
    /// value, then descend.
    fn walk_paths_seq<'a>(
        &'a mut self,
        path: Vec<u8>,
        prefix: Vec<u8>,
        l: Option<&'a dyn Loader>,
        f: &'a WalkPathFn,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            self.materialize(l).await?;

            let next = extend_reporting_dirs(path, &prefix, f)?;
            report_value(self, &next, f)?;

            if self.is_edge() {
                for fork in self.forks_mut().values_mut() {
                    fork.node
                        .walk_paths_seq(next.clone(), fork.prefix.clone(), l, f)
                        .await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn walk_paths_conc<'a>(
        &'a mut self,
        path: Vec<u8>,
        prefix: Vec<u8>,
        l: Option<&'a dyn Loader>,
        f: &'a WalkPathFn,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if cancel.is_cancelled() {
                return Err(ManifestError::Cancelled);
            }
            self.materialize(l).await?;

            let next = extend_reporting_dirs(path, &prefix, f)?;
            report_value(self, &next, f)?;

            if self.is_edge() {
                try_join_all(self.forks_mut().values_mut().map(|fork| {
                    fork.node.walk_paths_conc(
                        next.clone(),
                        fork.prefix.clone(),
                        l,
                        f,
                        cancel,
                    )
                }))
                .await?;
            }
            Ok(())
        }
        .boxed()
    }
}

/// Append `prefix` to `path`, reporting a directory at every separator:
/// the path accumulated so far, excluding the separator itself.
fn extend_reporting_dirs(
    mut path: Vec<u8>,
    prefix: &[u8],
    f: &WalkPathFn,
) -> Result<Vec<u8>> {
    for b in prefix {
        if *b == PATH_SEPARATOR {
            f(&path, true)?;
        }
        path.push(*b);
    }
    Ok(path)
}

/// Report a value node as a file, unless its path ends with a separator
/// (that boundary was already reported as a directory).
fn report_value(node: &Node, path: &[u8], f: &WalkPathFn) -> Result<()> {
    if !node.is_value() {
        return Ok(());
    }
    match path.last() {
        Some(&PATH_SEPARATOR) | None => Ok(()),
        Some(_) => f(path, false),
    }
}
