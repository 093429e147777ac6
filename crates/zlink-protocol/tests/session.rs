//! Commands pushed through framing and back, split at arbitrary points the
//! way a serial read loop delivers them.

use zlink_protocol::*;

fn aps_request(seq: u8, payload: Vec<u8>) -> Command {
    Command::new(
        CMD_APS_DATA_REQUEST,
        vec![
            Value::U8(0),
            Value::U8(seq),
            Value::U8(0x02),
            Value::U16(0x1234),
            Value::U8(0x01),
            Value::U16(0x0104),
            Value::U16(0x0006),
            Value::U8(0x01),
            Value::Bytes(payload),
            Value::U8(0x04),
            Value::U8(0x00),
        ],
    )
    .with_seq(seq)
}

#[test]
fn test_stream_split_at_every_offset() {
    let tx = ProtocolSession::default();
    let commands = vec![
        Command::request(CMD_STATUS).unwrap().with_seq(1),
        aps_request(2, vec![FRAME_END, FRAME_ESC, 0x00, 0xFF]),
        Command::new(CMD_DEBUG_LOG, vec![Value::U8(3), Value::Str("boot ok".into())]).with_seq(3),
        Command::new(CMD_NEIGHBOR_LIST, vec![Value::U8(0), Value::List(vec![0xC0DB, 1, 2])])
            .with_seq(4),
    ];

    let mut stream = Vec::new();
    for cmd in &commands {
        stream.extend(tx.encode_command(cmd).expect("encodes"));
    }

    for split in 0..stream.len() {
        let mut rx = ProtocolSession::default();
        rx.feed(&stream[..split]);
        rx.feed(&stream[split..]);

        let mut received = Vec::new();
        while let Some(result) = rx.try_decode() {
            received.push(result.expect("decodes"));
        }
        assert_eq!(received, commands, "split at {}", split);
    }
}

#[test]
fn test_noise_between_frames_is_discarded() {
    let tx = ProtocolSession::default();
    let status = Command::new(CMD_STATUS_CHANGED, vec![Value::U8(0x22), Value::U8(0)]).with_seq(5);

    let mut stream = b"Bootloader noise\r\n".to_vec();
    stream.extend(tx.encode_command(&status).unwrap());
    stream.extend_from_slice(&[0x11, 0x22, FRAME_END]);
    stream.extend(tx.encode_command(&status).unwrap());

    let mut rx = ProtocolSession::default();
    rx.feed(&stream);

    let mut received = Vec::new();
    while let Some(result) = rx.try_decode() {
        received.push(result.unwrap());
    }
    assert_eq!(received, vec![status.clone(), status]);
    assert_eq!(rx.receiver_stats().frames, 2);
    assert_eq!(rx.receiver_stats().checksum_errors, 2);
}

#[test]
fn test_unknown_command_surfaces_as_error() {
    let mut rx = ProtocolSession::default();
    let mut payload = vec![0x77, 1, 0, 6, 0, 0xAB];
    payload[3] = payload.len() as u8;
    rx.feed(&FrameCodec::encode(&payload));
    assert_eq!(rx.try_decode(), Some(Err(ParseError::UnknownCommand(0x77))));
}

#[test]
fn test_extension_table_session() {
    let mut table = CommandTable::default();
    table.register(0x60, "TEMPERATURE", "BW", true).unwrap();

    let mut session = ProtocolSession::new(&table);
    let cmd = Command::new(0x60, vec![Value::U8(0x22), Value::U16(2150)]).with_seq(8);
    let frame = session.encode_command(&cmd).unwrap();
    session.feed(&frame);

    let decoded = session.try_decode().unwrap().unwrap();
    assert_eq!(decoded, cmd);
    assert_eq!(
        session.table().status_update(&decoded),
        Some(StatusUpdate { state: 0x22, ext: None })
    );

    // The built-in table does not know the extension.
    assert!(ProtocolSession::default().encode_command(&cmd).is_err());
}
