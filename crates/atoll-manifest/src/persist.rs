//! Recursive content-addressed persist and lazy stub materialization.
//!
//! `save` walks the tree bottom-up: children are persisted before their
//! parent, since the parent's bytes embed the children's references. A
//! node with a non-empty reference is clean and is skipped together with
//! its whole subtree — mutations clear references along the root path, so
//! exactly the dirty spine is re-persisted.
//!
//! Sibling subtrees are disjoint in memory, so their saves run
//! concurrently with first-error semantics: the first failing branch
//! stops its siblings at their current suspension point.

use atoll_store::{Loader, Saver, StoreError};
use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ManifestError;
use crate::marshal::random_obfuscation_key;
use crate::node::Node;

type Result<T> = std::result::Result<T, ManifestError>;

impl Node {
    /// Materialize a reference stub in place by fetching and decoding its
    /// bytes through the loader. A no-op on already materialized nodes.
    pub(crate) async fn materialize(&mut self, l: Option<&dyn Loader>) -> Result<()> {
        if self.forks.is_some() {
            return Ok(());
        }
        if self.reference.is_empty() {
            self.forks = Some(Default::default());
            return Ok(());
        }
        let loader = l.ok_or(ManifestError::NoLoader)?;
        let data = loader.load(&self.reference).await.map_err(|e| match e {
            StoreError::NotFound(reference) => ManifestError::NotFound(hex::encode(reference)),
            other => ManifestError::Store(other),
        })?;
        self.unmarshal_into(&data)?;
        debug!(
            reference = %hex::encode(&self.reference),
            forks = self.forks_ref().len(),
            "materialized manifest node"
        );
        Ok(())
    }

    /// Persist the tree bottom-up and return the root reference.
    ///
    /// Idempotent: a second save without intervening mutation changes no
    /// reference and stores nothing new.
    pub async fn save(&mut self, saver: Option<&dyn Saver>) -> Result<Bytes> {
        self.save_with_cancellation(saver, &CancellationToken::new())
            .await
    }

    /// [`save`](Node::save) with a cooperative cancellation signal,
    /// observed between recursion frames.
    pub async fn save_with_cancellation(
        &mut self,
        saver: Option<&dyn Saver>,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let saver = saver.ok_or(ManifestError::NoSaver)?;
        self.save_inner(saver, cancel).await?;
        Ok(self.reference.clone())
    }

    fn save_inner<'a>(
        &'a mut self,
        saver: &'a dyn Saver,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            // Clean subtree: already persisted and unchanged since.
            if !self.reference.is_empty() {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(ManifestError::Cancelled);
            }

            // The root's obfuscation key is pushed down to every dirty
            // child before it serializes itself, so one manifest shares
            // one key.
            let key = *self.obfuscation_key.get_or_insert_with(random_obfuscation_key);

            if let Some(forks) = self.forks.as_mut() {
                for fork in forks.values_mut() {
                    if fork.node.reference.is_empty() {
                        fork.node.obfuscation_key = Some(key);
                    }
                }
                try_join_all(
                    forks
                        .values_mut()
                        .map(|fork| fork.node.save_inner(saver, cancel)),
                )
                .await?;
            }

            if cancel.is_cancelled() {
                return Err(ManifestError::Cancelled);
            }

            let fork_count = self.forks.as_ref().map(|f| f.len()).unwrap_or_default();
            let data = self.marshal_binary()?;
            let size = data.len();
            let reference = saver.save(data).await?;
            debug!(
                reference = %hex::encode(&reference),
                size,
                forks = fork_count,
                "persisted manifest node"
            );
            self.reference = Bytes::from(reference);

            // Children are recoverable by address from here on; release
            // the fork table to reclaim memory.
            self.forks = None;
            Ok(())
        }
        .boxed()
    }
}
