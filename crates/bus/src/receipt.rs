use tokio::sync::oneshot;

/// Outcome of a publish call.
///
/// Counts are fixed at publish time; [`delivered`](Self::delivered) waits
/// for the accepting subscribers to finish their handlers.
#[derive(Debug, Default)]
pub struct Receipt {
    pending: Vec<oneshot::Receiver<()>>,
    refused: usize,
}

impl Receipt {
    pub(crate) fn accept(&mut self, acked: oneshot::Receiver<()>) {
        self.pending.push(acked);
    }

    pub(crate) fn refuse(&mut self) {
        self.refused += 1;
    }

    /// Number of subscribers whose inbox took the payload.
    pub fn accepted(&self) -> usize {
        self.pending.len()
    }

    /// Number of subscribers that did not receive the payload (full inbox or
    /// stopped task).
    pub fn refused(&self) -> usize {
        self.refused
    }

    /// Wait until every accepting subscriber has handled the payload.
    ///
    /// Returns how many handlers ran to completion or were absorbed after a
    /// panic. A subscriber task torn down mid-queue is not counted.
    pub async fn delivered(self) -> usize {
        let mut delivered = 0;
        for acked in self.pending {
            if acked.await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}
