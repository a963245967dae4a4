mod common;

use common::*;
use vexv5_link::checks::crc32;
use vexv5_link::config::ConnectionConfig;
use vexv5_link::connection::Connection;
use vexv5_link::device::file::{download_file, upload_file, FileBasicInfo, FileWriteRequest};
use vexv5_link::errors::{DeviceError, TransferError, TransferStep, VexAckType};
use vexv5_link::v5::meta::{FileTransferTarget, FileVendor};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Serves reads of `data` at the default load address
fn serving(data: Vec<u8>, window: u16) -> Handler {
    Box::new(move |request| match request.extended {
        Some(0x11) => vec![init_reply(window, data.len() as u32)],
        Some(0x14) => {
            let address = request.u32_at(0);
            let size = u16::from_le_bytes([request.payload[4], request.payload[5]]) as usize;
            let offset = (address - 0x03800000) as usize;

            let mut chunk = data[offset.min(data.len())..(offset + size).min(data.len())].to_vec();
            chunk.resize(size, 0);

            let mut body = vec![0x14];
            body.extend(address.to_le_bytes());
            body.extend(chunk);
            vec![cdc2_frame(&body)]
        }
        Some(0x12) => vec![ack(0x12, &[])],
        _ => Vec::new(),
    })
}

#[tokio::test]
async fn uploads_in_window_sized_chunks() {
    let (connection, brain) = connect(accepting_brain()).await;
    let data = pattern(10000);
    let mut progress = Vec::new();

    let request = FileWriteRequest::new("slot_1.bin", &data);
    upload_file(&connection, &request, |current, total| {
        progress.push((current, total))
    })
    .await
    .unwrap();

    let init = &brain.requests_for(0x11)[0];
    assert_eq!(init.payload[0], 1);
    assert_eq!(init.u32_at(4), 10000);
    assert_eq!(init.u32_at(8), 0x03800000);
    assert_eq!(init.u32_at(12), crc32(&data, 0));
    assert_eq!(init.init_name(), "slot_1.bin");

    let writes = brain.requests_for(0x13);
    let sizes: Vec<usize> = writes.iter().map(|w| w.payload.len() - 4).collect();
    assert_eq!(sizes, vec![4096, 4096, 1808]);

    let addresses: Vec<u32> = writes.iter().map(|w| w.u32_at(0)).collect();
    assert_eq!(addresses, vec![0x03800000, 0x03801000, 0x03802000]);

    let written: Vec<u8> = writes.iter().flat_map(|w| w.payload[4..].to_vec()).collect();
    assert_eq!(written, data);

    assert_eq!(
        progress,
        vec![(4096, 10000), (8192, 10000), (10000, 10000)]
    );

    // Halt, since the file does not run on its own
    assert_eq!(brain.requests_for(0x12)[0].payload, vec![3]);
    assert!(brain.requests_for(0x15).is_empty());
}

#[tokio::test]
async fn last_chunk_is_padded_to_words() {
    let (connection, brain) = connect(accepting_brain()).await;
    let data = pattern(10);

    let mut request = FileWriteRequest::new("slot_1.bin", &data);
    request.auto_run = true;
    upload_file(&connection, &request, |_, _| {}).await.unwrap();

    let writes = brain.requests_for(0x13);
    assert_eq!(writes.len(), 1);
    assert_eq!(&writes[0].payload[4..14], &data[..]);
    assert_eq!(&writes[0].payload[14..], &[0, 0]);

    // Run the program once it is written
    assert_eq!(brain.requests_for(0x12)[0].payload, vec![1]);
}

#[tokio::test]
async fn small_windows_shrink_the_chunks() {
    let (connection, brain) = connect(Box::new(|request| match request.extended {
        Some(0x11) => vec![init_reply(1000, 0)],
        Some(ext) => vec![ack(ext, &[])],
        None => Vec::new(),
    }))
    .await;
    let data = pattern(2500);

    upload_file(&connection, &FileWriteRequest::new("a.bin", &data), |_, _| {})
        .await
        .unwrap();

    let sizes: Vec<usize> = brain
        .requests_for(0x13)
        .iter()
        .map(|w| w.payload.len() - 4)
        .collect();
    assert_eq!(sizes, vec![1000, 1000, 500]);
}

#[tokio::test]
async fn linked_uploads_link_before_writing() {
    let (connection, brain) = connect(accepting_brain()).await;
    let data = pattern(100);

    let mut request = FileWriteRequest::new("slot_1.bin", &data);
    request.linked_file = Some(vexv5_link::device::LinkedFile {
        name: "slot_1_lib.bin".to_string(),
        vendor: Some(FileVendor::Dev2),
    });
    upload_file(&connection, &request, |_, _| {}).await.unwrap();

    let order: Vec<u8> = brain
        .requests()
        .iter()
        .filter_map(|r| r.extended)
        .collect();
    assert_eq!(order, vec![0x11, 0x15, 0x13, 0x12]);

    let link = &brain.requests_for(0x15)[0];
    assert_eq!(link.payload[0], 24);
    assert_eq!(link.vendor_name(), "slot_1_lib.bin");
}

#[tokio::test]
async fn a_rejected_chunk_ends_the_upload() {
    let (connection, brain) = connect(Box::new(|request| match request.extended {
        Some(0x11) => vec![init_reply(4096, 0)],
        Some(0x13) => vec![nack(0x13, 0xD6)],
        Some(ext) => vec![ack(ext, &[])],
        None => Vec::new(),
    }))
    .await;
    let data = pattern(9000);

    let err = upload_file(&connection, &FileWriteRequest::new("a.bin", &data), |_, _| {})
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TransferError::StepFailed {
            step: TransferStep::Chunk,
            outcome: VexAckType::NackAlign
        }
    ));
    assert_eq!(brain.requests_for(0x13).len(), 1);
    assert!(brain.requests_for(0x12).is_empty());
}

#[tokio::test]
async fn a_rejected_init_sends_nothing_else() {
    let (connection, brain) = connect(Box::new(|request| match request.extended {
        Some(0x11) => vec![nack(0x11, 0xDB)],
        _ => Vec::new(),
    }))
    .await;

    let err = upload_file(&connection, &FileWriteRequest::new("a.bin", &[1, 2, 3, 4]), |_, _| {})
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TransferError::StepFailed {
            step: TransferStep::Init,
            outcome: VexAckType::NackFileExists
        }
    ));
    assert_eq!(brain.requests().len(), 2);
}

#[tokio::test]
async fn transfers_need_a_connection() {
    let connection = Connection::new(MockBackend::new(Vec::new()), ConnectionConfig::default());

    let err = upload_file(&connection, &FileWriteRequest::new("a.bin", &[0; 4]), |_, _| {})
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::Device(DeviceError::NotConnected)
    ));
}

#[tokio::test]
async fn downloads_are_trimmed_to_the_file_size() {
    let data = pattern(5000);
    let (connection, brain) = connect(serving(data.clone(), 4096)).await;
    let mut progress = Vec::new();

    let contents = download_file(
        &connection,
        &FileBasicInfo::from("slot_1.bin"),
        FileTransferTarget::Qspi,
        |current, total| progress.push((current, total)),
    )
    .await
    .unwrap();

    assert_eq!(contents, data);
    assert_eq!(progress, vec![(4096, 5000), (5000, 5000)]);

    let init = &brain.requests_for(0x11)[0];
    assert_eq!(init.payload[0], 2);
    assert_eq!(init.u32_at(12), 0);

    let reads = brain.requests_for(0x14);
    assert_eq!(reads.len(), 2);
    assert_eq!(reads[1].u32_at(0), 0x03801000);
    assert_eq!(brain.requests_for(0x12)[0].payload, vec![3]);
}

#[tokio::test]
async fn downloads_can_ask_for_less_than_the_file() {
    let data = pattern(5000);
    let (connection, brain) = connect(serving(data.clone(), 4096)).await;

    let mut file = FileBasicInfo::new("slot_1.bin", FileVendor::User);
    file.size = Some(100);
    let contents = download_file(&connection, &file, FileTransferTarget::Qspi, |_, _| {})
        .await
        .unwrap();

    assert_eq!(contents, &data[..100]);
    assert_eq!(brain.requests_for(0x14).len(), 1);
}

#[tokio::test]
async fn empty_files_download_as_empty() {
    let (connection, _brain) = connect(serving(Vec::new(), 4096)).await;

    let contents = download_file(
        &connection,
        &FileBasicInfo::from("empty.txt"),
        FileTransferTarget::Qspi,
        |_, _| {},
    )
    .await
    .unwrap();
    assert!(contents.is_empty());
}

#[tokio::test]
async fn concurrent_transfers_share_the_port() {
    let (connection, brain) = connect(accepting_brain()).await;
    let first = pattern(300);
    let second = pattern(600);

    let first_request = FileWriteRequest::new("a.bin", &first);
    let second_request = FileWriteRequest::new("b.bin", &second);
    let (a, b) = tokio::join!(
        upload_file(&connection, &first_request, |_, _| {}),
        upload_file(&connection, &second_request, |_, _| {}),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(brain.requests_for(0x11).len(), 2);
    assert_eq!(brain.requests_for(0x12).len(), 2);
}
