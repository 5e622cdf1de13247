//! Reducers for statements that answer with a single OK or ERR packet.

use crate::error::{MergeError, Result};
use crate::packet::{ErrPacket, OkPacket, Packet, PacketKind, STATUS_AUTOCOMMIT};

/// XA and lock errors that poison a distributed transaction.
const ER_XA_RBROLLBACK: u16 = 1402;
const ER_XA_RBTIMEOUT: u16 = 1613;
const ER_XA_RBDEADLOCK: u16 = 1614;
const ER_LOCK_DEADLOCK: u16 = 1213;
const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
const ER_DUP_ENTRY: u16 = 1062;

/// Folds every shard's reply to an INSERT/UPDATE/DELETE/SET into one OK
/// packet. The first ERR wins and is forwarded as is.
pub fn merge_for_modify(first_packets: &[Packet], global_table: bool) -> Result<Packet> {
    let mut affected_rows: u64 = 0;
    let mut warnings: u16 = 0;
    let mut last_insert_id: u64 = 0;
    for (shard, packet) in first_packets.iter().enumerate() {
        match packet.kind() {
            PacketKind::Err => return Ok(packet.clone()),
            PacketKind::Eof => continue,
            PacketKind::Ok => {
                let ok = OkPacket::parse(packet).ok_or_else(|| MergeError::Malformed {
                    shard,
                    reason: "short OK packet".to_string(),
                })?;
                affected_rows = affected_rows.saturating_add(ok.affected_rows);
                warnings = warnings.saturating_add(ok.warnings);
                if last_insert_id == 0 {
                    last_insert_id = ok.last_insert_id;
                }
            }
            PacketKind::Data => {
                return Err(MergeError::Malformed {
                    shard,
                    reason: "result set where OK was expected".to_string(),
                })
            }
        }
    }
    // Every copy of a global table reports the same rows.
    if global_table && !first_packets.is_empty() {
        affected_rows /= first_packets.len() as u64;
    }
    Ok(OkPacket {
        affected_rows,
        last_insert_id,
        status: STATUS_AUTOCOMMIT,
        warnings,
    }
    .to_packet(1))
}

/// Whether one shard's first reply lets a distributed transaction go on.
pub fn check_dist_tran_resultset(first: Option<&Packet>, responded: usize) -> bool {
    let Some(packet) = first else {
        return false;
    };
    match packet.kind() {
        PacketKind::Eof => false,
        PacketKind::Err => {
            let Some(err) = ErrPacket::parse(packet) else {
                return false;
            };
            match err.code {
                ER_XA_RBROLLBACK | ER_XA_RBTIMEOUT | ER_XA_RBDEADLOCK | ER_LOCK_DEADLOCK
                | ER_LOCK_WAIT_TIMEOUT => false,
                ER_DUP_ENTRY => responded <= 1,
                _ => !err.sqlstate.get(..2).is_some_and(|s| s.eq_ignore_ascii_case("XA")),
            }
        }
        PacketKind::Ok | PacketKind::Data => true,
    }
}
