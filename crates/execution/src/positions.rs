use std::sync::Arc;

use strangle_core::Position;
use tokio::sync::Mutex;

/// Shared book of open short option legs, written by the trade engine and
/// drained by the unwind watcher.
#[derive(Clone, Default)]
pub struct PositionBook {
    inner: Arc<Mutex<Vec<Position>>>,
}

impl PositionBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, position: Position) {
        self.inner.lock().await.push(position);
    }

    /// Replaces the book wholesale, used when reseeding from the venue at
    /// cycle start.
    pub async fn seed(&self, positions: Vec<Position>) {
        *self.inner.lock().await = positions;
    }

    /// Removes and returns every leg whose strike the spot has crossed.
    pub async fn take_breached(&self, spot: f64) -> Vec<Position> {
        let mut book = self.inner.lock().await;
        let mut breached = Vec::new();
        let mut i = 0;
        while i < book.len() {
            if book[i].is_breached(spot) {
                breached.push(book.swap_remove(i));
            } else {
                i += 1;
            }
        }
        breached
    }

    pub async fn drain_all(&self) -> Vec<Position> {
        std::mem::take(&mut *self.inner.lock().await)
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
