//! Distributed statement executor
//!
//! Sends each group its SQL, feeds the shard streams into a
//! [`MergeState`] as they arrive and forwards merged packets to the client.

use crate::error::{CoordinatorError, Result};
use crate::plan::ShardingPlan;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use shardgate_engine::error::ER_MERGE_FAILED;
use shardgate_engine::{ErrPacket, MergeSpec, MergeState, MergeStatus, Packet, ShardBatch};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

/// Transport to the backend groups.
///
/// `execute` returns the raw response packets of `sql` on `group`, in
/// whatever batches the connection produces them.
#[async_trait]
pub trait ShardConnector: Send + Sync + 'static {
    async fn execute(
        &self,
        group: &str,
        sql: &str,
    ) -> Result<BoxStream<'static, Result<Vec<Packet>>>>;
}

enum ShardEvent {
    Batch {
        shard: usize,
        packets: Vec<Packet>,
        finished: bool,
    },
    Failed {
        group: String,
        reason: String,
    },
}

fn err_packet(message: impl Into<String>) -> Packet {
    ErrPacket {
        code: ER_MERGE_FAILED,
        sqlstate: "HY000".to_string(),
        message: message.into(),
    }
    .to_packet(1)
}

/// Runs a routed plan on its groups and merges the responses.
pub struct DistributedExecutor<C: ShardConnector> {
    connector: Arc<C>,
    shard_timeout: Duration,
}

impl<C: ShardConnector> DistributedExecutor<C> {
    pub fn new(connector: Arc<C>, shard_timeout: Duration) -> Self {
        Self {
            connector,
            shard_timeout,
        }
    }

    /// Starts one task per group and returns the merged response stream.
    ///
    /// A shard failure or timeout ends the stream with a single ERR packet;
    /// whatever was merged so far is discarded.
    pub async fn execute(
        &self,
        plan: &ShardingPlan,
        spec: MergeSpec,
    ) -> Result<BoxStream<'static, Vec<Packet>>> {
        let groups = plan.groups().to_vec();
        if groups.is_empty() {
            return Err(CoordinatorError::Internal(
                "no group to run the statement on".to_string(),
            ));
        }

        let (event_tx, mut event_rx) = mpsc::channel::<ShardEvent>(100);
        for (shard, group) in groups.iter().enumerate() {
            let connector = self.connector.clone();
            let tx = event_tx.clone();
            let group = group.clone();
            let sql = plan.get_sql_for_group(&group).to_string();
            debug!(%group, %sql, "dispatching to shard");

            tokio::spawn(async move {
                let mut stream = match connector.execute(&group, &sql).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = tx
                            .send(ShardEvent::Failed {
                                group,
                                reason: e.to_string(),
                            })
                            .await;
                        return;
                    }
                };
                while let Some(item) = stream.next().await {
                    let event = match item {
                        Ok(packets) => ShardEvent::Batch {
                            shard,
                            packets,
                            finished: false,
                        },
                        Err(e) => ShardEvent::Failed {
                            group: group.clone(),
                            reason: e.to_string(),
                        },
                    };
                    let failed = matches!(event, ShardEvent::Failed { .. });
                    if tx.send(event).await.is_err() || failed {
                        return;
                    }
                }
                let _ = tx
                    .send(ShardEvent::Batch {
                        shard,
                        packets: Vec::new(),
                        finished: true,
                    })
                    .await;
            });
        }
        drop(event_tx);

        let (out_tx, out_rx) = mpsc::channel::<Vec<Packet>>(100);
        let deadline = Instant::now() + self.shard_timeout;
        let shard_count = groups.len();

        tokio::spawn(async move {
            let mut state = MergeState::new(spec, shard_count);
            loop {
                let event = match timeout_at(deadline, event_rx.recv()).await {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        error!("shard streams ended before the merge completed");
                        let _ = out_tx.send(vec![err_packet("incomplete shard response")]).await;
                        return;
                    }
                    Err(_) => {
                        warn!(shards = shard_count, "shard response timed out");
                        let _ = out_tx.send(vec![err_packet("timeout waiting for shards")]).await;
                        return;
                    }
                };
                let (shard, packets, finished) = match event {
                    ShardEvent::Batch {
                        shard,
                        packets,
                        finished,
                    } => (shard, packets, finished),
                    ShardEvent::Failed { group, reason } => {
                        warn!(%group, %reason, "shard failed");
                        let _ = out_tx
                            .send(vec![err_packet(format!("shard {group} failed: {reason}"))])
                            .await;
                        return;
                    }
                };
                match state.advance(ShardBatch::new(shard, packets, finished)) {
                    Ok(MergeStatus::More(out)) => {
                        if !out.is_empty() && out_tx.send(out).await.is_err() {
                            return;
                        }
                    }
                    Ok(MergeStatus::Done(out)) => {
                        let _ = out_tx.send(out).await;
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "merge failed");
                        let _ = out_tx.send(vec![e.to_err_packet(1)]).await;
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(out_rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use shardgate_engine::{OkPacket, PacketKind};
    use std::collections::HashMap;

    struct FixedConnector {
        responses: HashMap<String, Vec<Packet>>,
    }

    #[async_trait]
    impl ShardConnector for FixedConnector {
        async fn execute(
            &self,
            group: &str,
            _sql: &str,
        ) -> Result<BoxStream<'static, Result<Vec<Packet>>>> {
            match self.responses.get(group) {
                Some(packets) => Ok(stream::iter(vec![Ok(packets.clone())]).boxed()),
                None => Err(CoordinatorError::Shard {
                    group: group.to_string(),
                    reason: "unreachable".to_string(),
                }),
            }
        }
    }

    fn ok(affected: u64) -> Packet {
        OkPacket {
            affected_rows: affected,
            ..OkPacket::default()
        }
        .to_packet(1)
    }

    async fn collect(stream: BoxStream<'static, Vec<Packet>>) -> Vec<Packet> {
        stream.collect::<Vec<_>>().await.into_iter().flatten().collect()
    }

    #[tokio::test]
    async fn sums_affected_rows() {
        let connector = FixedConnector {
            responses: HashMap::from([("g1".to_string(), vec![ok(2)]), ("g2".to_string(), vec![ok(3)])]),
        };
        let executor = DistributedExecutor::new(Arc::new(connector), Duration::from_secs(5));
        let mut plan = ShardingPlan::new("DELETE FROM t");
        plan.add_groups(["g1", "g2"]);
        let out = collect(executor.execute(&plan, MergeSpec::modify(false)).await.unwrap()).await;
        assert_eq!(out.len(), 1);
        assert_eq!(OkPacket::parse(&out[0]).unwrap().affected_rows, 5);
    }

    #[tokio::test]
    async fn shard_failure_becomes_err_packet() {
        let connector = FixedConnector {
            responses: HashMap::from([("g1".to_string(), vec![ok(1)])]),
        };
        let executor = DistributedExecutor::new(Arc::new(connector), Duration::from_secs(5));
        let mut plan = ShardingPlan::new("DELETE FROM t");
        plan.add_groups(["g1", "g2"]);
        let out = collect(executor.execute(&plan, MergeSpec::modify(false)).await.unwrap()).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind(), PacketKind::Err);
        let err = ErrPacket::parse(&out[0]).unwrap();
        assert!(err.message.contains("g2"), "{}", err.message);
    }

    #[tokio::test]
    async fn empty_plan_is_rejected() {
        let connector = FixedConnector {
            responses: HashMap::new(),
        };
        let executor = DistributedExecutor::new(Arc::new(connector), Duration::from_secs(1));
        let plan = ShardingPlan::new("SELECT 1");
        assert!(executor.execute(&plan, MergeSpec::select()).await.is_err());
    }
}
