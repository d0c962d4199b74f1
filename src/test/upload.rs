use std::prelude::v1::*;

use proptest::prelude::*;

use crate::upload::*;

/// Acknowledges every chunk of the current upload, returning the reassembled payload and the chunk sizes.
fn drain(channel: &mut UploadChannel) -> (Vec<u8>, Vec<usize>) {
    let mut payload = Vec::new();
    let mut sizes = Vec::new();
    loop {
        match channel.chunk_ready() {
            Some(Frame::Chunk(data)) => {
                sizes.push(data.len());
                payload.extend_from_slice(&data);
            }
            Some(Frame::Trailer) => return (payload, sizes),
            x => panic!("unexpected frame {x:?}"),
        }
    }
}

proptest! {
    #[test]
    fn test_chunks_reassemble(program in any::<String>(), chunk_size in 0usize..600) {
        let mut channel = UploadChannel::new(chunk_size);
        let expected_chunks = match program.len() {
            0 => 0,
            n => (n + chunk_size.clamp(1, MAX_CHUNK_SIZE) - 1) / chunk_size.clamp(1, MAX_CHUNK_SIZE),
        };
        prop_assert_eq!(channel.send(program.clone()), SendStatus::Started { chunks: expected_chunks });

        let (payload, sizes) = drain(&mut channel);
        prop_assert_eq!(payload.as_slice(), program.as_bytes());
        prop_assert_eq!(sizes.len(), expected_chunks);
        for size in sizes {
            prop_assert!(size >= 1 && size <= MAX_CHUNK_SIZE && size <= chunk_size.max(1));
        }
        prop_assert!(!channel.is_uploading());
        prop_assert_eq!(channel.chunk_ready(), None);
    }

    #[test]
    fn test_chunk_frames(data in proptest::collection::vec(any::<u8>(), 0..=MAX_CHUNK_SIZE)) {
        let bytes = Frame::Chunk(data.clone()).to_bytes();
        prop_assert_eq!(bytes[0] as usize, data.len());
        prop_assert_eq!(&bytes[1..], data.as_slice());
    }
}

#[test]
fn test_multibyte_split() {
    let program = "print(\"☺☺☺\")".to_string();
    let mut channel = UploadChannel::new(8);
    channel.send(program.clone());
    let (payload, sizes) = drain(&mut channel);
    assert_eq!(sizes, [8, 8, 2]);
    assert_eq!(String::from_utf8(payload).unwrap(), program);
}

#[test]
fn test_identical_program_sent_once() {
    let mut channel = UploadChannel::new(MAX_CHUNK_SIZE);
    assert_eq!(channel.send("a = 1".into()), SendStatus::Started { chunks: 1 });
    // still in flight
    assert_eq!(channel.send("a = 1".into()), SendStatus::Skipped);
    drain(&mut channel);
    assert_eq!(channel.send("a = 1".into()), SendStatus::Skipped);
    assert!(!channel.is_uploading());

    assert_eq!(channel.send("a = 2".into()), SendStatus::Started { chunks: 1 });
    drain(&mut channel);
    assert_eq!(channel.send("a = 1".into()), SendStatus::Started { chunks: 1 });
    drain(&mut channel);

    channel.forget();
    assert_eq!(channel.send("a = 1".into()), SendStatus::Started { chunks: 1 });
}

#[test]
fn test_replace_in_flight() {
    let mut channel = UploadChannel::new(2);
    channel.send("aaaa".into());
    assert_eq!(channel.chunk_ready(), Some(Frame::Chunk(b"aa".to_vec())));
    assert_eq!(channel.send("bbb".into()), SendStatus::Queued { chunks: 2 });
    assert!(channel.is_uploading());
    assert_eq!(channel.chunk_ready(), Some(Frame::Restart));
    let (payload, _) = drain(&mut channel);
    assert_eq!(payload, b"bbb");

    // going back to the program being uploaded drops the queued one
    channel.forget_sent();
    channel.send("dd".into());
    channel.send("eeee".into());
    assert_eq!(channel.send("dd".into()), SendStatus::Skipped);
    let (payload, _) = drain(&mut channel);
    assert_eq!(payload, b"dd");

    channel.send("cc".into());
    channel.send("ff".into());
    channel.cancel();
    assert!(!channel.is_uploading());
    assert_eq!(channel.chunk_ready(), None);
    // the last completed upload is still remembered
    assert_eq!(channel.send("dd".into()), SendStatus::Skipped);
    channel.forget_sent();
    assert_eq!(channel.send("dd".into()), SendStatus::Started { chunks: 1 });
}
