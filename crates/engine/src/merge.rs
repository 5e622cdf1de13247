//! Resumable scatter-gather merge.
//!
//! A [`MergeState`] is fed one [`ShardBatch`] at a time by whoever owns the
//! shard connections. Each call consumes what it can and returns either
//! `More` (possibly with a chunk of output to flush) or `Done` with the tail
//! of the response. Nothing here blocks: when a shard cursor that has not
//! finished runs out of buffered rows, the merge suspends until that shard
//! delivers more.

use crate::aggregate::{fold_rows, having_passes};
use crate::compare::{compare_values, CompareFamily};
use crate::descriptors::{resolve, MergeKind, MergeSpec, Resolved, SortKey};
use crate::error::{MergeError, Result};
use crate::heap::MergeHeap;
use crate::packet::{field_count, row_column, FieldDef, Packet, PacketKind, Reader};
use crate::reduce::merge_for_modify;
use std::cmp::Ordering;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Packets received from one shard since the previous call.
#[derive(Debug, Clone)]
pub struct ShardBatch {
    pub shard: usize,
    pub packets: Vec<Packet>,
    /// The shard's stream is closed; nothing follows this batch.
    pub complete: bool,
}

impl ShardBatch {
    pub fn new(shard: usize, packets: Vec<Packet>, complete: bool) -> Self {
        Self {
            shard,
            packets,
            complete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStatus {
    /// Waiting for more shard input. The packets, if any, go to the client now.
    More(Vec<Packet>),
    /// The response is complete with these packets.
    Done(Vec<Packet>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Rows,
    /// LIMIT reached or a shard failed: discard rows until every shard ends.
    Draining,
    Done,
}

/// A buffered row and the payload spans of its leading columns, filled in
/// the first time the row is compared.
#[derive(Debug, Clone)]
struct Row {
    packet: Packet,
    spans: Option<Vec<Option<(usize, usize)>>>,
}

impl Row {
    fn new(packet: Packet) -> Self {
        Self {
            packet,
            spans: None,
        }
    }

    fn prime(&mut self, columns: usize, shard: usize) -> Result<()> {
        if self.spans.is_some() || columns == 0 {
            return Ok(());
        }
        let payload = self.packet.payload();
        let mut r = Reader::new(payload);
        let mut spans = Vec::with_capacity(columns);
        for i in 0..columns {
            let column = r.column().ok_or_else(|| MergeError::Malformed {
                shard,
                reason: format!("row has no column {}", i + 1),
            })?;
            spans.push(column.map(|v| (r.position() - v.len(), r.position())));
        }
        self.spans = Some(spans);
        Ok(())
    }

    fn value(&self, pos: usize) -> Option<&[u8]> {
        let payload = self.packet.payload();
        match self.spans.as_ref().and_then(|s| s.get(pos)) {
            Some(Some((start, end))) => payload.get(*start..*end),
            Some(None) => None,
            None => row_column(&self.packet, pos).flatten(),
        }
    }
}

#[derive(Debug, Default)]
struct Cursor {
    header: Vec<Packet>,
    header_len: Option<usize>,
    /// First packet was OK, ERR or EOF instead of a result set.
    terminal_first: Option<Packet>,
    pending: VecDeque<Row>,
    finished: bool,
    complete: bool,
}

impl Cursor {
    fn header_done(&self) -> bool {
        self.header_len.is_some_and(|n| self.header.len() == n)
    }

    fn has_head(&self) -> bool {
        !self.pending.is_empty()
    }

    fn ready(&self) -> bool {
        self.finished || self.has_head()
    }
}

/// Row order on `keys`. An unordered key (BLOB, ENUM, ...) ends the comparison
/// with `a` first, so later keys are not consulted and such rows never compare
/// equal.
fn compare_rows(a: &Row, b: &Row, keys: &[SortKey]) -> Result<Ordering> {
    for key in keys {
        if key.family == CompareFamily::Unordered {
            return Ok(Ordering::Less);
        }
        let ord = compare_values(key.family, a.value(key.pos), b.value(key.pos))?;
        let ord = if key.desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(Ordering::Equal)
}

/// Duplicate test for DISTINCT. Unordered columns never match.
fn rows_equal(a: &Row, b: &Row, keys: &[SortKey]) -> Result<bool> {
    if keys.is_empty() || keys.iter().any(|k| k.family == CompareFamily::Unordered) {
        return Ok(false);
    }
    Ok(compare_rows(a, b, keys)? == Ordering::Equal)
}

pub struct MergeState {
    spec: MergeSpec,
    cursors: Vec<Cursor>,
    phase: Phase,
    resolved: Resolved,
    /// Columns each row must expose for key comparison.
    key_columns: usize,
    next_seq: u8,
    heap: Option<MergeHeap>,
    heap_dirty: bool,
    skipped: u64,
    emitted: u64,
    last_emitted: Option<Row>,
    first_err: Option<Packet>,
    out: Vec<Packet>,
    out_bytes: usize,
}

impl MergeState {
    pub fn new(spec: MergeSpec, shard_count: usize) -> Self {
        let mut spec = spec;
        if spec.kind == MergeKind::ShowWarnings {
            spec.limit = None;
            spec.offset = 0;
        }
        Self {
            spec,
            cursors: (0..shard_count).map(|_| Cursor::default()).collect(),
            phase: Phase::Header,
            resolved: Resolved::default(),
            key_columns: 0,
            next_seq: 0,
            heap: None,
            heap_dirty: false,
            skipped: 0,
            emitted: 0,
            last_emitted: None,
            first_err: None,
            out: Vec::new(),
            out_bytes: 0,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Feeds one batch and runs the merge as far as buffered input allows.
    ///
    /// On error the state is finished and any unsent output is discarded;
    /// the caller reports the failure with [`MergeError::to_err_packet`].
    pub fn advance(&mut self, batch: ShardBatch) -> Result<MergeStatus> {
        if self.phase == Phase::Done {
            return Ok(MergeStatus::Done(Vec::new()));
        }
        let result = self.step(batch);
        if let Err(e) = &result {
            warn!(error = %e, "merge failed");
            self.phase = Phase::Done;
            self.out.clear();
            self.out_bytes = 0;
        }
        result
    }

    fn step(&mut self, batch: ShardBatch) -> Result<MergeStatus> {
        self.ingest(batch)?;
        match self.spec.kind {
            MergeKind::Explain => return self.step_explain(),
            MergeKind::Modify { global_table } => return self.step_modify(global_table),
            MergeKind::Select | MergeKind::ShowWarnings => {}
        }

        if self.phase == Phase::Header {
            if let Some(first) = self.cursors.iter().find_map(|c| c.terminal_first.clone()) {
                debug!(kind = ?first.kind(), "shard answered without a result set");
                self.phase = Phase::Done;
                return Ok(MergeStatus::Done(vec![first]));
            }
            self.check_truncated()?;
            if !self.cursors.iter().all(Cursor::header_done) {
                return Ok(MergeStatus::More(Vec::new()));
            }
            self.finish_header()?;
        }

        self.check_truncated()?;
        if self.phase == Phase::Rows {
            if !self.resolved.aggregates.is_empty() {
                self.merge_aggregates()?;
            } else if !self.resolved.order.is_empty() {
                self.merge_ordered()?;
            } else {
                self.merge_simple()?;
            }
        }
        if self.phase == Phase::Draining {
            for cursor in &mut self.cursors {
                cursor.pending.clear();
            }
        }
        if self.cursors.iter().all(|c| c.finished && !c.has_head()) {
            self.finish();
            return Ok(MergeStatus::Done(self.take_output()));
        }
        Ok(self.flush())
    }

    fn ingest(&mut self, batch: ShardBatch) -> Result<()> {
        let shard = batch.shard;
        let shard_count = self.cursors.len();
        let cursor = self
            .cursors
            .get_mut(shard)
            .ok_or_else(|| MergeError::Malformed {
                shard,
                reason: format!("only {shard_count} shards in this merge"),
            })?;
        let explain = self.spec.kind == MergeKind::Explain;
        if explain && shard != 0 {
            // Shard 0 answers for every shard.
            return Ok(());
        }
        for packet in batch.packets {
            if cursor.finished {
                continue;
            }
            if explain {
                self.out_bytes += packet.len();
                self.out.push(packet.clone());
            }
            if !cursor.header_done() {
                if cursor.header.is_empty() && packet.kind() != PacketKind::Data {
                    cursor.terminal_first = Some(packet);
                    cursor.finished = true;
                    continue;
                }
                if cursor.header.is_empty() {
                    let count = field_count(&packet).ok_or_else(|| MergeError::Malformed {
                        shard,
                        reason: "bad result-set header".to_string(),
                    })?;
                    let count = usize::try_from(count).map_err(|_| MergeError::Malformed {
                        shard,
                        reason: "field count out of range".to_string(),
                    })?;
                    cursor.header_len = Some(count + 2);
                }
                cursor.header.push(packet);
                continue;
            }
            match packet.kind() {
                PacketKind::Eof => cursor.finished = true,
                PacketKind::Err => {
                    cursor.finished = true;
                    if self.first_err.is_none() {
                        warn!(shard, "shard reported an error mid-stream");
                        self.first_err = Some(packet);
                    }
                }
                PacketKind::Ok | PacketKind::Data => cursor.pending.push_back(Row::new(packet)),
            }
        }
        cursor.complete |= batch.complete;
        Ok(())
    }

    fn check_truncated(&self) -> Result<()> {
        match self.cursors.iter().position(|c| c.complete && !c.finished) {
            Some(shard) => Err(MergeError::Truncated(shard)),
            None => Ok(()),
        }
    }

    fn finish_header(&mut self) -> Result<()> {
        let counts: Vec<usize> = self
            .cursors
            .iter()
            .map(|c| c.header_len.unwrap_or(2) - 2)
            .collect();
        let expected = counts.first().copied().unwrap_or(0);
        if let Some(&other) = counts.iter().find(|&&n| n != expected) {
            return Err(MergeError::FieldCountMismatch(expected as u64, other as u64));
        }

        let header = self
            .cursors
            .first_mut()
            .map(|c| std::mem::take(&mut c.header))
            .unwrap_or_default();
        if self.spec.needs_field_defs() {
            let fields = header
                .iter()
                .skip(1)
                .take(expected)
                .map(|p| {
                    FieldDef::parse(p).ok_or_else(|| MergeError::Malformed {
                        shard: 0,
                        reason: "bad field definition".to_string(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            self.resolved = resolve(&self.spec, &fields)?;
            self.key_columns = self
                .resolved
                .order
                .iter()
                .chain(&self.resolved.group)
                .map(|k| k.pos + 1)
                .max()
                .unwrap_or(0);
            debug!(
                order = self.resolved.order.len(),
                group = self.resolved.group.len(),
                aggregates = self.resolved.aggregates.len(),
                distinct = self.resolved.distinct,
                "merge columns resolved"
            );
        }
        for cursor in self.cursors.iter_mut() {
            cursor.header.clear();
        }

        let header_packets = expected + 2;
        self.next_seq = (header_packets as u8).wrapping_add(1);
        for packet in header {
            self.push_out(packet);
        }
        self.phase = Phase::Rows;
        Ok(())
    }

    fn limit_reached(&self) -> bool {
        self.spec.limit.is_some_and(|limit| self.emitted >= limit)
    }

    fn should_drain(&self) -> bool {
        self.first_err.is_some() || self.limit_reached()
    }

    fn all_live_have_heads(&self) -> bool {
        self.cursors.iter().all(Cursor::ready)
    }

    fn prime_heads(&mut self) -> Result<()> {
        let columns = self.key_columns;
        for (shard, cursor) in self.cursors.iter_mut().enumerate() {
            if let Some(row) = cursor.pending.front_mut() {
                row.prime(columns, shard)?;
            }
        }
        Ok(())
    }

    fn merge_simple(&mut self) -> Result<()> {
        for shard in 0..self.cursors.len() {
            while !self.should_drain() {
                let Some(row) = self.cursors[shard].pending.pop_front() else {
                    break;
                };
                self.offer(row)?;
            }
        }
        if self.should_drain() {
            self.phase = Phase::Draining;
        }
        Ok(())
    }

    fn merge_ordered(&mut self) -> Result<()> {
        loop {
            if self.should_drain() {
                self.phase = Phase::Draining;
                return Ok(());
            }
            if !self.all_live_have_heads() {
                return Ok(());
            }
            self.prime_heads()?;

            let (mut heap, fresh) = match self.heap.take() {
                Some(heap) => (heap, false),
                None => (MergeHeap::new(0..self.cursors.len()), true),
            };
            let cursors = &self.cursors;
            let keys = &self.resolved.order;
            let mut is_prior_to = |a: usize, b: usize| -> Result<bool> {
                Ok(match (cursors[a].pending.front(), cursors[b].pending.front()) {
                    (Some(x), Some(y)) => match compare_rows(x, y, keys)? {
                        Ordering::Less => true,
                        Ordering::Greater => false,
                        Ordering::Equal => a < b,
                    },
                    (Some(_), None) => true,
                    (None, Some(_)) => false,
                    (None, None) => a < b,
                })
            };
            let sifted = if fresh {
                heap.build(&mut is_prior_to)
            } else if self.heap_dirty {
                heap.sift_down(0, &mut is_prior_to)
            } else {
                Ok(())
            };
            let top = heap.top();
            self.heap = Some(heap);
            sifted?;
            self.heap_dirty = false;

            let Some(top) = top else {
                return Ok(());
            };
            let Some(row) = self.cursors[top].pending.pop_front() else {
                // Every cursor is exhausted.
                return Ok(());
            };
            self.heap_dirty = true;
            self.offer(row)?;
        }
    }

    fn merge_aggregates(&mut self) -> Result<()> {
        loop {
            if self.should_drain() {
                self.phase = Phase::Draining;
                return Ok(());
            }
            if !self.all_live_have_heads() {
                return Ok(());
            }
            self.prime_heads()?;

            let keys = &self.resolved.group;
            let mut min: Option<usize> = None;
            for (shard, cursor) in self.cursors.iter().enumerate() {
                let Some(head) = cursor.pending.front() else {
                    continue;
                };
                let better = match min.and_then(|m| self.cursors[m].pending.front()) {
                    Some(best) => compare_rows(head, best, keys)? == Ordering::Less,
                    None => true,
                };
                if better {
                    min = Some(shard);
                }
            }
            let Some(min) = min else {
                return Ok(());
            };
            let Some(mut acc) = self.cursors[min].pending.pop_front() else {
                return Ok(());
            };

            for shard in 0..self.cursors.len() {
                if shard == min {
                    continue;
                }
                let same_group = match self.cursors[shard].pending.front() {
                    Some(head) => compare_rows(&acc, head, &self.resolved.group)? == Ordering::Equal,
                    None => false,
                };
                if !same_group {
                    continue;
                }
                if let Some(other) = self.cursors[shard].pending.pop_front() {
                    let folded = fold_rows(&acc.packet, &other.packet, &self.resolved.aggregates)?;
                    acc = Row::new(folded);
                    acc.prime(self.key_columns, min)?;
                }
            }

            if let Some(having) = &self.spec.having {
                let value = row_column(&acc.packet, having.column_index).ok_or_else(|| {
                    MergeError::Malformed {
                        shard: min,
                        reason: format!("HAVING column {} missing", having.column_index + 1),
                    }
                })?;
                if !having_passes(value, having)? {
                    continue;
                }
            }
            self.offer(acc)?;
        }
    }

    /// Applies DISTINCT, OFFSET and LIMIT to the next merged row.
    fn offer(&mut self, row: Row) -> Result<()> {
        if self.resolved.distinct {
            if let Some(last) = &self.last_emitted {
                if rows_equal(last, &row, &self.resolved.order)? {
                    return Ok(());
                }
            }
            self.last_emitted = Some(row.clone());
        }
        if self.skipped < self.spec.offset {
            self.skipped += 1;
            return Ok(());
        }
        if self.limit_reached() {
            return Ok(());
        }
        let mut packet = row.packet;
        packet.set_seq(self.next_seq);
        self.next_seq = self.next_seq.wrapping_add(1);
        self.emitted += 1;
        self.push_out(packet);
        Ok(())
    }

    fn finish(&mut self) {
        let last = match self.first_err.take() {
            Some(mut err) => {
                err.set_seq(self.next_seq);
                err
            }
            None => Packet::eof(self.next_seq),
        };
        debug!(rows = self.emitted, failed = last.is_err(), "merge finished");
        self.push_out(last);
        self.phase = Phase::Done;
    }

    fn step_explain(&mut self) -> Result<MergeStatus> {
        let Some(first) = self.cursors.first_mut() else {
            return Err(MergeError::MissingResponse(0));
        };
        first.pending.clear();
        if first.finished || first.complete {
            self.phase = Phase::Done;
            return Ok(MergeStatus::Done(self.take_output()));
        }
        Ok(MergeStatus::More(self.take_output()))
    }

    fn step_modify(&mut self, global_table: bool) -> Result<MergeStatus> {
        let missing = self
            .cursors
            .iter()
            .position(|c| c.complete && c.terminal_first.is_none());
        if let Some(shard) = missing {
            return Err(MergeError::MissingResponse(shard));
        }
        let firsts: Option<Vec<Packet>> = self
            .cursors
            .iter()
            .map(|c| c.terminal_first.clone())
            .collect();
        let Some(firsts) = firsts else {
            return Ok(MergeStatus::More(Vec::new()));
        };
        self.phase = Phase::Done;
        Ok(MergeStatus::Done(vec![merge_for_modify(&firsts, global_table)?]))
    }

    fn push_out(&mut self, packet: Packet) {
        self.out_bytes += packet.len();
        self.out.push(packet);
    }

    fn take_output(&mut self) -> Vec<Packet> {
        self.out_bytes = 0;
        std::mem::take(&mut self.out)
    }

    fn flush(&mut self) -> MergeStatus {
        if self.out_bytes >= self.spec.merged_output_size {
            MergeStatus::More(self.take_output())
        } else {
            MergeStatus::More(Vec::new())
        }
    }
}
