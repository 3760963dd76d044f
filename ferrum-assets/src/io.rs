//! Asynchronous block reads.
//!
//! A request names a stream and a block count; the worker decodes that
//! many container blocks and fires the callback once per block, in file
//! order, with the accumulated-block payload of that read. Requests are
//! served by priority (lower first), FIFO within a priority, which also
//! keeps per-stream reads in block order since producers issue them
//! coarse-to-fine.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::Read as _;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::format::{self, ByteReader};

pub const PRIORITY_NORMAL: i32 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsyncOperationStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Delivered once per block of a request.
pub struct BlockReadResult {
    pub status: AsyncOperationStatus,
    /// Decoded payload of this block; empty unless `Succeeded`.
    pub data: Vec<u8>,
    /// Index of this block within its request, starting at zero.
    pub block_index: u32,
    /// Total blocks of the request.
    pub block_count: u32,
}

pub type BlockReadCallback = Box<dyn FnMut(BlockReadResult) + Send>;

struct StreamState {
    file: File,
    next_block: u32,
}

/// A sequential cursor over an asset file's container blocks.
#[derive(Clone)]
pub struct BlockStream {
    state: Arc<Mutex<StreamState>>,
}

impl BlockStream {
    fn read_one_block(&self) -> Result<Vec<u8>, fe::ErrorKind> {
        let mut state = self.state.lock();

        // Container blocks are length-prefixed, so read the header first
        // and then exactly the pages it names.
        let mut header_bytes = [0u8; std::mem::size_of::<format::BlockHeader>()];
        state
            .file
            .read_exact(&mut header_bytes)
            .map_err(|_| fe::ErrorKind::IoError)?;
        let header: format::BlockHeader =
            ByteReader::new(&header_bytes).read()?;
        if header.uncompressed_size > format::BLOCK_SIZE {
            return Err(fe::ErrorKind::IoError);
        }

        let mut block_bytes = header_bytes.to_vec();
        loop {
            let mut page_bytes = [0u8; std::mem::size_of::<format::PageHeader>()];
            state
                .file
                .read_exact(&mut page_bytes)
                .map_err(|_| fe::ErrorKind::IoError)?;
            let page: format::PageHeader = ByteReader::new(&page_bytes).read()?;

            let mut payload = vec![0u8; page.compressed_size as usize];
            state
                .file
                .read_exact(&mut payload)
                .map_err(|_| fe::ErrorKind::IoError)?;

            block_bytes.extend_from_slice(&page_bytes);
            block_bytes.extend_from_slice(&payload);
            if page.next_page_offset == format::LAST_PAGE {
                break;
            }
        }

        let mut footer_bytes = [0u8; std::mem::size_of::<format::BlockFooter>()];
        state
            .file
            .read_exact(&mut footer_bytes)
            .map_err(|_| fe::ErrorKind::IoError)?;
        block_bytes.extend_from_slice(&footer_bytes);

        state.next_block += 1;
        format::read_block(&mut ByteReader::new(&block_bytes))
    }
}

pub struct AsyncBlockReadRequest {
    pub stream: BlockStream,
    pub block_count: u32,
    /// Lower values are served first.
    pub priority: i32,
    /// Cancelled requests still fire their callbacks, with
    /// [`AsyncOperationStatus::Cancelled`].
    pub cancel: Option<Arc<AtomicBool>>,
    pub callback: BlockReadCallback,
}

struct QueuedRequest {
    request: AsyncBlockReadRequest,
    sequence: u64,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}
impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap: invert so the lowest priority value
        // and then the lowest sequence number pop first.
        other
            .request
            .priority
            .cmp(&self.request.priority)
            .then(other.sequence.cmp(&self.sequence))
    }
}

enum IoMessage {
    Read(QueuedRequest),
    Stop,
}

/// The block reader service: one IO worker, priority-ordered requests.
pub struct AsyncBlockIo {
    sender: Sender<IoMessage>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    next_sequence: Mutex<u64>,
}

impl AsyncBlockIo {
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let worker = thread::Builder::new()
            .name("fe-async-io".into())
            .spawn(move || worker_loop(&receiver))
            .expect("failed to spawn io worker");
        Arc::new(Self {
            sender,
            worker: Mutex::new(Some(worker)),
            next_sequence: Mutex::new(0),
        })
    }

    /// Opens an asset file as a block stream positioned at block zero.
    pub fn open(&self, path: &Path) -> Result<BlockStream, fe::ErrorKind> {
        let file = File::open(path).map_err(|error| {
            log::error!("failed to open {}: {error}", path.display());
            fe::ErrorKind::IoError
        })?;
        Ok(BlockStream {
            state: Arc::new(Mutex::new(StreamState {
                file,
                next_block: 0,
            })),
        })
    }

    pub fn read_async(&self, request: AsyncBlockReadRequest) {
        let sequence = {
            let mut next = self.next_sequence.lock();
            *next += 1;
            *next
        };
        let _ = self.sender.send(IoMessage::Read(QueuedRequest { request, sequence }));
    }
}

impl Drop for AsyncBlockIo {
    fn drop(&mut self) {
        let _ = self.sender.send(IoMessage::Stop);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(receiver: &Receiver<IoMessage>) {
    let mut queue: BinaryHeap<QueuedRequest> = BinaryHeap::new();
    loop {
        // Block while idle, then drain whatever else arrived so priorities
        // apply across every pending request.
        if queue.is_empty() {
            match receiver.recv() {
                Ok(IoMessage::Read(request)) => queue.push(request),
                Ok(IoMessage::Stop) | Err(_) => return,
            }
        }
        loop {
            match receiver.try_recv() {
                Ok(IoMessage::Read(request)) => queue.push(request),
                Ok(IoMessage::Stop) => return,
                Err(_) => break,
            }
        }

        if let Some(queued) = queue.pop() {
            serve_request(queued.request);
        }
    }
}

fn serve_request(mut request: AsyncBlockReadRequest) {
    profiling::scope!("AsyncBlockIo::serve_request");

    for block_index in 0..request.block_count {
        let cancelled = request
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire));
        if cancelled {
            (request.callback)(BlockReadResult {
                status: AsyncOperationStatus::Cancelled,
                data: Vec::new(),
                block_index,
                block_count: request.block_count,
            });
            return;
        }

        match request.stream.read_one_block() {
            Ok(data) => (request.callback)(BlockReadResult {
                status: AsyncOperationStatus::Succeeded,
                data,
                block_index,
                block_count: request.block_count,
            }),
            Err(_) => {
                (request.callback)(BlockReadResult {
                    status: AsyncOperationStatus::Failed,
                    data: Vec::new(),
                    block_index,
                    block_count: request.block_count,
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ByteWriter;
    use std::io::Write as _;

    fn write_temp_asset(blocks: &[&[u8]]) -> std::path::PathBuf {
        static FILE_INDEX: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

        let mut writer = ByteWriter::new();
        for block in blocks {
            format::write_block(&mut writer, block);
        }
        let path = std::env::temp_dir().join(format!(
            "ferrum-io-test-{}-{}.bin",
            std::process::id(),
            FILE_INDEX.fetch_add(1, Ordering::Relaxed)
        ));
        let mut file = File::create(&path).unwrap();
        file.write_all(&writer.into_inner()).unwrap();
        path
    }

    #[test]
    fn blocks_arrive_in_order_with_payloads() {
        let path = write_temp_asset(&[&[1u8; 100], &[2u8; 200], &[3u8; 50]]);
        let io = AsyncBlockIo::new();
        let stream = io.open(&path).unwrap();

        let results: Arc<Mutex<Vec<(u32, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let done = ferrum_jobs::WaitGroup::new(1);

        let sink = Arc::clone(&results);
        let signal = Arc::clone(&done);
        io.read_async(AsyncBlockReadRequest {
            stream,
            block_count: 3,
            priority: PRIORITY_NORMAL,
            cancel: None,
            callback: Box::new(move |result| {
                assert_eq!(result.status, AsyncOperationStatus::Succeeded);
                sink.lock().push((result.block_index, result.data.len()));
                if result.block_index + 1 == result.block_count {
                    signal.signal();
                }
            }),
        });

        done.wait();
        assert_eq!(*results.lock(), vec![(0, 100), (1, 200), (2, 50)]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn cancelled_requests_still_call_back() {
        let path = write_temp_asset(&[&[7u8; 10]]);
        let io = AsyncBlockIo::new();
        let stream = io.open(&path).unwrap();

        let cancel = Arc::new(AtomicBool::new(true));
        let done = ferrum_jobs::WaitGroup::new(1);
        let signal = Arc::clone(&done);
        io.read_async(AsyncBlockReadRequest {
            stream,
            block_count: 1,
            priority: PRIORITY_NORMAL,
            cancel: Some(cancel),
            callback: Box::new(move |result| {
                assert_eq!(result.status, AsyncOperationStatus::Cancelled);
                signal.signal();
            }),
        });
        done.wait();
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn truncated_file_reports_failure() {
        let path = write_temp_asset(&[&[9u8; 40]]);
        let io = AsyncBlockIo::new();
        let stream = io.open(&path).unwrap();

        let done = ferrum_jobs::WaitGroup::new(1);
        let signal = Arc::clone(&done);
        // The file has one block; asking for two fails on the second.
        io.read_async(AsyncBlockReadRequest {
            stream,
            block_count: 2,
            priority: PRIORITY_NORMAL,
            cancel: None,
            callback: Box::new(move |result| {
                if result.block_index == 1 {
                    assert_eq!(result.status, AsyncOperationStatus::Failed);
                    signal.signal();
                } else {
                    assert_eq!(result.status, AsyncOperationStatus::Succeeded);
                }
            }),
        });
        done.wait();
        let _ = std::fs::remove_file(path);
    }
}
