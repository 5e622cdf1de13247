use shardgate_engine::packet::{row_column, row_packet};
use shardgate_engine::{
    AggregateItem, AggregateKind, ColumnRef, CompareOp, ErrPacket, FieldDef, HavingFilter,
    LiteralKind, MergeError, MergeKind, MergeSpec, MergeState, MergeStatus, OkPacket, OrderItem,
    Packet, ShardBatch,
};

const LONGLONG: u8 = 0x08;
const NEWDECIMAL: u8 = 0xf6;
const VAR_STRING: u8 = 0xfd;

/// A complete text-protocol result set as one shard would send it.
fn result_set(fields: &[(&str, u8)], rows: &[Vec<Option<&str>>]) -> Vec<Packet> {
    let n = fields.len() as u8;
    let mut packets = vec![Packet::from_payload(1, &[n])];
    for (i, (name, ty)) in fields.iter().enumerate() {
        let def = FieldDef {
            table: "t".into(),
            org_table: "t".into(),
            name: name.to_string(),
            org_name: name.to_string(),
            column_type: *ty,
            ..FieldDef::default()
        };
        packets.push(def.to_packet(i as u8 + 2));
    }
    packets.push(Packet::eof(n + 2));
    let mut seq = n + 3;
    for row in rows {
        let cells: Vec<Option<&[u8]>> = row.iter().map(|c| c.map(str::as_bytes)).collect();
        packets.push(row_packet(seq, &cells));
        seq = seq.wrapping_add(1);
    }
    packets.push(Packet::eof(seq));
    packets
}

fn int_rows(values: &[i64]) -> Vec<Vec<Option<String>>> {
    values.iter().map(|v| vec![Some(v.to_string())]).collect()
}

fn as_refs(rows: &[Vec<Option<String>>]) -> Vec<Vec<Option<&str>>> {
    rows.iter()
        .map(|r| r.iter().map(|c| c.as_deref()).collect())
        .collect()
}

/// Splits every shard stream into batches of `size` packets and feeds them
/// round-robin, collecting everything the merge emits.
fn run_interleaved(state: &mut MergeState, streams: Vec<Vec<Packet>>, size: usize) -> Vec<Packet> {
    let mut queues: Vec<Vec<ShardBatch>> = streams
        .into_iter()
        .enumerate()
        .map(|(shard, packets)| {
            let chunks: Vec<Vec<Packet>> = packets.chunks(size).map(<[Packet]>::to_vec).collect();
            let last = chunks.len().saturating_sub(1);
            chunks
                .into_iter()
                .enumerate()
                .map(|(i, chunk)| ShardBatch::new(shard, chunk, i == last))
                .rev()
                .collect()
        })
        .collect();
    let mut out = Vec::new();
    loop {
        let mut fed = false;
        for queue in queues.iter_mut() {
            let Some(batch) = queue.pop() else {
                continue;
            };
            fed = true;
            match state.advance(batch).unwrap() {
                MergeStatus::More(packets) => out.extend(packets),
                MergeStatus::Done(packets) => {
                    out.extend(packets);
                    return out;
                }
            }
        }
        if !fed {
            panic!("merge did not finish");
        }
    }
}

/// Column values of the row packets between the header and the final packet.
fn merged_rows(out: &[Packet], columns: usize) -> Vec<Vec<Option<String>>> {
    let header = columns + 2;
    out[header..out.len() - 1]
        .iter()
        .map(|p| {
            (0..columns)
                .map(|i| {
                    row_column(p, i)
                        .unwrap()
                        .map(|v| String::from_utf8(v.to_vec()).unwrap())
                })
                .collect()
        })
        .collect()
}

#[test]
fn test_sharded_limit_offset_matches_single_table() {
    let sorted: Vec<i64> = (0..60).map(|i| i / 2).collect();
    let (limit, offset) = (5u64, 7u64);
    let per_shard = (limit + offset) as usize;

    let mut shards: Vec<Vec<i64>> = vec![Vec::new(); 3];
    for (i, v) in sorted.iter().enumerate() {
        shards[(i * 7 + i / 4) % 3].push(*v);
    }
    // each shard runs `LIMIT 0, limit + offset`
    let streams = shards
        .iter()
        .map(|values| {
            let rows = int_rows(&values[..per_shard.min(values.len())]);
            result_set(&[("id", LONGLONG)], &as_refs(&rows))
        })
        .collect();

    let spec = MergeSpec {
        order_by: vec![OrderItem {
            column: ColumnRef::name("id"),
            desc: false,
        }],
        limit: Some(limit),
        offset,
        ..MergeSpec::select()
    };
    let mut state = MergeState::new(spec, 3);
    let out = run_interleaved(&mut state, streams, 2);

    let expected = int_rows(&sorted[offset as usize..(offset + limit) as usize]);
    assert_eq!(merged_rows(&out, 1), expected);
    let seqs: Vec<u8> = out.iter().map(Packet::seq).collect();
    assert_eq!(seqs, (1..=9).collect::<Vec<u8>>());
    assert!(out.last().unwrap().is_eof());
}

#[test]
fn test_descending_merge_with_empty_shard() {
    let a = int_rows(&[90, 40, 40, 3]);
    let b = int_rows(&[77, 41, 2]);
    let streams = vec![
        result_set(&[("price", NEWDECIMAL)], &as_refs(&a)),
        result_set(&[("price", NEWDECIMAL)], &[]),
        result_set(&[("price", NEWDECIMAL)], &as_refs(&b)),
    ];
    let spec = MergeSpec {
        order_by: vec![OrderItem {
            column: ColumnRef::Ordinal(1),
            desc: true,
        }],
        ..MergeSpec::select()
    };
    let mut state = MergeState::new(spec, 3);
    let out = run_interleaved(&mut state, streams, 1);
    assert_eq!(merged_rows(&out, 1), int_rows(&[90, 77, 41, 40, 40, 3, 2]));
}

#[test]
fn test_group_by_folds_partial_aggregates() {
    let fields = [("region", VAR_STRING), ("cnt", LONGLONG), ("total", NEWDECIMAL)];
    let shard0 = result_set(
        &fields,
        &[
            vec![Some("east"), Some("2"), Some("10.50")],
            vec![Some("north"), Some("1"), Some("3")],
            vec![Some("west"), Some("4"), Some("7.25")],
        ],
    );
    let shard1 = result_set(
        &fields,
        &[
            vec![Some("east"), Some("3"), Some("1.5")],
            vec![Some("south"), Some("2"), Some("2")],
            vec![Some("West"), Some("1"), Some("0.75")],
        ],
    );
    let spec = MergeSpec {
        group_by: vec![ColumnRef::name("region")],
        aggregates: vec![
            AggregateItem {
                position: 1,
                function: AggregateKind::Count,
            },
            AggregateItem {
                position: 2,
                function: AggregateKind::Sum,
            },
        ],
        ..MergeSpec::select()
    };

    let mut state = MergeState::new(spec.clone(), 2);
    let out = run_interleaved(&mut state, vec![shard0.clone(), shard1.clone()], 3);
    let rows = merged_rows(&out, 3);
    let expected = [
        ("east", "5", "12.00"),
        ("north", "1", "3"),
        ("south", "2", "2"),
        ("west", "5", "8.00"),
    ];
    assert_eq!(rows.len(), expected.len());
    for (row, (region, cnt, total)) in rows.iter().zip(expected) {
        assert_eq!(row[0].as_deref(), Some(region));
        assert_eq!(row[1].as_deref(), Some(cnt));
        assert_eq!(row[2].as_deref(), Some(total));
    }

    let having = MergeSpec {
        having: Some(HavingFilter {
            column_index: 1,
            op: CompareOp::Gt,
            value: "1".into(),
            literal: LiteralKind::Integer,
        }),
        ..spec
    };
    let mut state = MergeState::new(having, 2);
    let out = run_interleaved(&mut state, vec![shard1, shard0], 100);
    let regions: Vec<String> = merged_rows(&out, 3)
        .into_iter()
        .filter_map(|r| r[0].clone())
        .collect();
    assert_eq!(regions, vec!["east", "south", "West"]);
}

#[test]
fn test_bare_count_sums_every_shard() {
    let streams = ["4", "5", "6"]
        .iter()
        .map(|v| result_set(&[("COUNT(*)", LONGLONG)], &[vec![Some(*v)]]))
        .collect();
    let spec = MergeSpec {
        aggregates: vec![AggregateItem {
            position: 0,
            function: AggregateKind::Count,
        }],
        ..MergeSpec::select()
    };
    let mut state = MergeState::new(spec, 3);
    let out = run_interleaved(&mut state, streams, 10);
    assert_eq!(merged_rows(&out, 1), vec![vec![Some("15".to_string())]]);
}

#[test]
fn test_distinct_drops_duplicates_before_offset() {
    let streams = vec![
        result_set(&[("name", VAR_STRING)], &[vec![Some("a")], vec![Some("b")], vec![Some("d")]]),
        result_set(&[("name", VAR_STRING)], &[vec![Some("B")], vec![Some("c")], vec![Some("d")]]),
    ];
    let spec = MergeSpec {
        order_by: vec![OrderItem {
            column: ColumnRef::name("name"),
            desc: false,
        }],
        distinct: true,
        offset: 1,
        ..MergeSpec::select()
    };
    let mut state = MergeState::new(spec, 2);
    let out = run_interleaved(&mut state, streams, 2);
    let names: Vec<String> = merged_rows(&out, 1)
        .into_iter()
        .filter_map(|r| r[0].clone())
        .collect();
    assert_eq!(names, vec!["b", "c", "d"]);
}

#[test]
fn test_error_first_packet_is_forwarded_alone() {
    let err = ErrPacket {
        code: 1146,
        sqlstate: "42S02".into(),
        message: "Table 'd.t_g2' doesn't exist".into(),
    }
    .to_packet(1);
    let mut state = MergeState::new(MergeSpec::select(), 2);
    let status = state
        .advance(ShardBatch::new(1, vec![err.clone()], true))
        .unwrap();
    assert_eq!(status, MergeStatus::Done(vec![err]));
    assert!(state.is_done());
}

#[test]
fn test_mid_stream_error_replaces_eof() {
    let good = result_set(&[("id", LONGLONG)], &[vec![Some("1")], vec![Some("2")]]);
    let mut bad = result_set(&[("id", LONGLONG)], &[vec![Some("3")]]);
    bad.pop();
    bad.push(
        ErrPacket {
            code: 2013,
            sqlstate: "HY000".into(),
            message: "Lost connection".into(),
        }
        .to_packet(5),
    );

    let mut state = MergeState::new(MergeSpec::select(), 2);
    assert_eq!(
        state.advance(ShardBatch::new(1, bad, true)).unwrap(),
        MergeStatus::More(Vec::new())
    );
    let MergeStatus::Done(out) = state.advance(ShardBatch::new(0, good, true)).unwrap() else {
        panic!("expected the merge to finish");
    };
    let last = out.last().unwrap();
    assert!(last.is_err());
    assert_eq!(last.seq(), out.len() as u8);
    // header, then the error in place of the end marker
    assert_eq!(out.len(), 4);
}

#[test]
fn test_field_count_mismatch_fails() {
    let mut state = MergeState::new(MergeSpec::select(), 2);
    state
        .advance(ShardBatch::new(0, result_set(&[("a", LONGLONG)], &[]), true))
        .unwrap();
    let err = state
        .advance(ShardBatch::new(
            1,
            result_set(&[("a", LONGLONG), ("b", LONGLONG)], &[]),
            true,
        ))
        .unwrap_err();
    assert_eq!(err, MergeError::FieldCountMismatch(1, 2));
    assert_eq!(err.to_err_packet(1).kind(), shardgate_engine::PacketKind::Err);
}

#[test]
fn test_stream_closed_without_terminator_is_truncated() {
    let mut stream = result_set(&[("a", LONGLONG)], &[vec![Some("1")]]);
    stream.pop();
    let mut state = MergeState::new(MergeSpec::select(), 2);
    let err = state.advance(ShardBatch::new(0, stream, true)).unwrap_err();
    assert_eq!(err, MergeError::Truncated(0));
}

#[test]
fn test_output_flushes_at_threshold() {
    let rows = int_rows(&(0..20).collect::<Vec<_>>());
    let full = result_set(&[("id", LONGLONG)], &as_refs(&rows));
    let mut partial = result_set(&[("id", LONGLONG)], &as_refs(&rows));
    let tail = partial.split_off(10);

    let spec = MergeSpec {
        merged_output_size: 64,
        ..MergeSpec::select()
    };
    let mut state = MergeState::new(spec, 2);
    assert_eq!(
        state.advance(ShardBatch::new(0, full, true)).unwrap(),
        MergeStatus::More(Vec::new())
    );
    let MergeStatus::More(flushed) = state.advance(ShardBatch::new(1, partial, false)).unwrap() else {
        panic!("expected a partial flush");
    };
    assert!(!flushed.is_empty());
    let MergeStatus::Done(rest) = state.advance(ShardBatch::new(1, tail, true)).unwrap() else {
        panic!("expected the merge to finish");
    };
    // header + 40 rows + eof
    assert_eq!(flushed.len() + rest.len(), 3 + 40 + 1);
}

#[test]
fn test_explain_forwards_first_shard() {
    let stream = result_set(&[("id", LONGLONG), ("select_type", VAR_STRING)], &[vec![Some("1"), Some("SIMPLE")]]);
    let mut state = MergeState::new(
        MergeSpec {
            kind: MergeKind::Explain,
            ..MergeSpec::select()
        },
        2,
    );
    assert_eq!(
        state.advance(ShardBatch::new(1, stream.clone(), true)).unwrap(),
        MergeStatus::More(Vec::new())
    );
    let MergeStatus::More(first) = state.advance(ShardBatch::new(0, stream[..3].to_vec(), false)).unwrap() else {
        panic!("expected pass-through");
    };
    let MergeStatus::Done(rest) = state.advance(ShardBatch::new(0, stream[3..].to_vec(), true)).unwrap() else {
        panic!("expected the merge to finish");
    };
    let forwarded: Vec<Packet> = first.into_iter().chain(rest).collect();
    assert_eq!(forwarded, stream);
}

#[test]
fn test_modify_sums_affected_rows() {
    let ok = |rows| {
        OkPacket {
            affected_rows: rows,
            ..OkPacket::default()
        }
        .to_packet(1)
    };
    let mut state = MergeState::new(MergeSpec::modify(false), 2);
    assert_eq!(
        state.advance(ShardBatch::new(0, vec![ok(2)], true)).unwrap(),
        MergeStatus::More(Vec::new())
    );
    let MergeStatus::Done(out) = state.advance(ShardBatch::new(1, vec![ok(3)], true)).unwrap() else {
        panic!("expected the merge to finish");
    };
    assert_eq!(OkPacket::parse(&out[0]).unwrap().affected_rows, 5);

    let mut state = MergeState::new(MergeSpec::modify(false), 2);
    let err = state.advance(ShardBatch::new(1, Vec::new(), true)).unwrap_err();
    assert_eq!(err, MergeError::MissingResponse(1));
}
