//! The ingestion pipeline: checksum, name, exclusively create, copy.
//!
//! Every part goes `open -> checksum -> rewind -> create -> copy`. A failure at
//! any stage ends that part only; the remaining parts of the request are still
//! attempted.

use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt};
use tracing::{info, warn};

use crate::checksum::Checksum;
use crate::error::{IngestError, Stage};
use crate::form::{FilePart, UploadForm};
use crate::naming::{Clock, output_file_name};
use crate::spool::PartReader;

/// A part that made it to disk.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub file_name: String,
    pub checksum: Checksum,
    pub size: u64,
}

/// Result of one part, tagged with where it came from.
#[derive(Debug)]
pub struct IngestOutcome {
    pub field: String,
    pub original_name: String,
    pub result: Result<StoredFile, IngestError>,
}

/// An uploaded file the pipeline can open, read and rewind.
pub trait PartSource {
    type Reader: AsyncRead + AsyncSeek + Unpin + Send;

    fn field(&self) -> &str;
    fn file_name(&self) -> &str;
    fn open(&self) -> impl Future<Output = io::Result<Self::Reader>> + Send;
}

impl PartSource for FilePart {
    type Reader = PartReader;

    fn field(&self) -> &str {
        FilePart::field(self)
    }

    fn file_name(&self) -> &str {
        FilePart::file_name(self)
    }

    fn open(&self) -> impl Future<Output = io::Result<PartReader>> + Send {
        self.content().open()
    }
}

/// Stores file parts in the output directory under their derived names.
pub struct Ingestor {
    output_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl Ingestor {
    pub fn new(output_dir: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self { output_dir, clock }
    }

    /// Ingests every file part of a parsed form.
    pub async fn ingest_all(&self, form: &UploadForm) -> Vec<IngestOutcome> {
        self.ingest_parts(form.parts()).await
    }

    /// Runs every part through the pipeline, one after another.
    pub async fn ingest_parts<P: PartSource>(&self, parts: &[P]) -> Vec<IngestOutcome> {
        let mut outcomes = Vec::with_capacity(parts.len());
        for part in parts {
            let result = self.ingest(part).await;
            match &result {
                Ok(stored) => info!(
                    field = part.field(),
                    original_name = part.file_name(),
                    path = %stored.path.display(),
                    checksum = %stored.checksum,
                    bytes = stored.size,
                    "stored upload"
                ),
                Err(err) => warn!(
                    field = part.field(),
                    original_name = part.file_name(),
                    stage = %err.stage,
                    collision = err.is_collision(),
                    error = %err.source,
                    "upload failed"
                ),
            }
            outcomes.push(IngestOutcome {
                field: part.field().to_owned(),
                original_name: part.file_name().to_owned(),
                result,
            });
        }
        outcomes
    }

    pub async fn ingest<P: PartSource>(&self, part: &P) -> Result<StoredFile, IngestError> {
        let reader = part
            .open()
            .await
            .map_err(|err| IngestError::new(Stage::Open, err))?;
        self.ingest_stream(part.file_name(), reader).await
    }

    /// Stores the content of an already opened, rewindable stream.
    pub async fn ingest_stream<R>(
        &self,
        original_name: &str,
        mut reader: R,
    ) -> Result<StoredFile, IngestError>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        let checksum = Checksum::compute(&mut reader)
            .await
            .map_err(|err| IngestError::new(Stage::Checksum, err))?;
        reader
            .seek(SeekFrom::Start(0))
            .await
            .map_err(|err| IngestError::new(Stage::Rewind, err))?;

        let file_name = output_file_name(&self.clock.now(), &checksum, original_name);
        let path = self.output_dir.join(&file_name);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|err| IngestError::new(Stage::Create, err))?;

        let size = match copy_and_sync(&mut reader, &mut file).await {
            Ok(size) => size,
            Err(err) => {
                drop(file);
                // create_new succeeded, so the partial file is ours to remove.
                if let Err(remove_err) = fs::remove_file(&path).await {
                    warn!(path = ?path, error = %remove_err, "failed to remove partial upload");
                }
                return Err(IngestError::new(Stage::Copy, err));
            }
        };

        Ok(StoredFile {
            path,
            file_name,
            checksum,
            size,
        })
    }
}

async fn copy_and_sync<R>(reader: &mut R, file: &mut File) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let size = tokio::io::copy(reader, file).await?;
    file.sync_all().await?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::{Cursor, ErrorKind};
    use std::path::Path;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::tempdir;
    use tokio::io::ReadBuf;

    use crate::naming::FixedClock;
    use crate::spool::PartContent;

    const HELLO_NAME: &str = "2024-01-01 00.00.00 +0000 5d41402abc4b2a76b9719d911017c592 report.txt";

    fn make_ingestor(dir: &Path) -> Ingestor {
        Ingestor::new(dir.to_path_buf(), Arc::new(FixedClock::new_year_2024()))
    }

    fn memory_part(file_name: &str, content: &'static [u8]) -> FilePart {
        FilePart::new("file", file_name, PartContent::Memory(Bytes::from_static(content)))
    }

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).expect("read dir").count()
    }

    /// Reads fine on the first pass; fails according to `mode` afterwards.
    struct Faulty {
        inner: Cursor<Vec<u8>>,
        mode: Fault,
        rewound: bool,
    }

    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Fault {
        Healthy,
        Open,
        Read,
        Seek,
        SecondRead,
    }

    impl Faulty {
        fn new(content: &[u8], mode: Fault) -> Self {
            Self {
                inner: Cursor::new(content.to_vec()),
                mode,
                rewound: false,
            }
        }
    }

    impl AsyncRead for Faulty {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let this = self.get_mut();
            let fail = match this.mode {
                Fault::Read => true,
                Fault::SecondRead => this.rewound,
                Fault::Healthy | Fault::Open | Fault::Seek => false,
            };
            if fail {
                return Poll::Ready(Err(io::Error::other("disk went away")));
            }
            Pin::new(&mut this.inner).poll_read(cx, buf)
        }
    }

    impl AsyncSeek for Faulty {
        fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
            let this = self.get_mut();
            if this.mode == Fault::Seek {
                return Err(io::Error::new(ErrorKind::Unsupported, "not seekable"));
            }
            this.rewound = true;
            Pin::new(&mut this.inner).start_seek(position)
        }

        fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
            Pin::new(&mut self.get_mut().inner).poll_complete(cx)
        }
    }

    /// An upload whose stream misbehaves at a chosen stage.
    struct FaultyPart {
        file_name: &'static str,
        content: &'static [u8],
        fault: Fault,
    }

    impl FaultyPart {
        fn healthy(file_name: &'static str, content: &'static [u8]) -> Self {
            Self {
                file_name,
                content,
                fault: Fault::Healthy,
            }
        }

        fn failing(file_name: &'static str, content: &'static [u8], fault: Fault) -> Self {
            Self {
                file_name,
                content,
                fault,
            }
        }
    }

    impl PartSource for FaultyPart {
        type Reader = Faulty;

        fn field(&self) -> &str {
            "file"
        }

        fn file_name(&self) -> &str {
            self.file_name
        }

        async fn open(&self) -> io::Result<Faulty> {
            if self.fault == Fault::Open {
                return Err(io::Error::new(ErrorKind::NotFound, "spooled content gone"));
            }
            Ok(Faulty::new(self.content, self.fault))
        }
    }

    #[tokio::test]
    async fn stores_under_timestamp_checksum_name() {
        let temp = tempdir().expect("tempdir");
        let ingestor = make_ingestor(temp.path());

        let stored = ingestor
            .ingest(&memory_part("report.txt", b"hello"))
            .await
            .expect("ingest");

        assert_eq!(stored.file_name, HELLO_NAME);
        assert_eq!(stored.path, temp.path().join(HELLO_NAME));
        assert_eq!(stored.size, 5);
        let written = fs::read(&stored.path).await.expect("read stored");
        assert_eq!(written, b"hello");
    }

    #[tokio::test]
    async fn embedded_checksum_matches_stored_bytes() {
        let temp = tempdir().expect("tempdir");
        let ingestor = make_ingestor(temp.path());
        let content: Vec<u8> = (0..100_000u32).map(|i| (i * 7 % 256) as u8).collect();

        let stored = ingestor
            .ingest_stream("blob.bin", Cursor::new(content))
            .await
            .expect("ingest");

        let written = fs::read(&stored.path).await.expect("read stored");
        let embedded = stored
            .file_name
            .split(' ')
            .nth(3)
            .expect("checksum segment");
        assert_eq!(embedded, Checksum::of(&written).to_hex());
    }

    #[tokio::test]
    async fn existing_destination_is_never_overwritten() {
        let temp = tempdir().expect("tempdir");
        let ingestor = make_ingestor(temp.path());
        let existing = temp.path().join(HELLO_NAME);
        fs::write(&existing, b"keep me").await.expect("seed");

        let err = ingestor
            .ingest(&memory_part("report.txt", b"hello"))
            .await
            .expect_err("collision must fail");

        assert_eq!(err.stage, Stage::Create);
        assert!(err.is_collision());
        assert_eq!(fs::read(&existing).await.expect("read"), b"keep me");
    }

    #[tokio::test]
    async fn read_failure_stops_at_checksum() {
        let temp = tempdir().expect("tempdir");
        let ingestor = make_ingestor(temp.path());

        let err = ingestor
            .ingest_stream("x.txt", Faulty::new(b"abc", Fault::Read))
            .await
            .expect_err("read fails");

        assert_eq!(err.stage, Stage::Checksum);
        assert_eq!(file_count(temp.path()), 0);
    }

    #[tokio::test]
    async fn seek_failure_stops_at_rewind() {
        let temp = tempdir().expect("tempdir");
        let ingestor = make_ingestor(temp.path());

        let err = ingestor
            .ingest_stream("x.txt", Faulty::new(b"abc", Fault::Seek))
            .await
            .expect_err("seek fails");

        assert_eq!(err.stage, Stage::Rewind);
        assert_eq!(file_count(temp.path()), 0);
    }

    #[tokio::test]
    async fn copy_failure_removes_partial_file() {
        let temp = tempdir().expect("tempdir");
        let ingestor = make_ingestor(temp.path());

        let err = ingestor
            .ingest_stream("x.txt", Faulty::new(b"abc", Fault::SecondRead))
            .await
            .expect_err("copy fails");

        assert_eq!(err.stage, Stage::Copy);
        assert_eq!(file_count(temp.path()), 0);
    }

    #[tokio::test]
    async fn one_failing_part_does_not_stop_the_others() {
        let temp = tempdir().expect("tempdir");
        let ingestor = make_ingestor(temp.path());
        fs::write(temp.path().join(HELLO_NAME), b"already here")
            .await
            .expect("seed");

        let form = UploadForm::new(vec![
            memory_part("first.txt", b"one"),
            memory_part("report.txt", b"hello"),
            memory_part("third.txt", b"three"),
        ]);
        let outcomes = ingestor.ingest_all(&form).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].result.is_ok());
        assert!(matches!(
            &outcomes[1].result,
            Err(err) if err.is_collision()
        ));
        assert!(outcomes[2].result.is_ok());
        assert_eq!(outcomes[1].original_name, "report.txt");
        assert_eq!(file_count(temp.path()), 3);
        assert_eq!(
            fs::read(temp.path().join(HELLO_NAME)).await.expect("read"),
            b"already here"
        );
    }

    #[tokio::test]
    async fn failure_at_any_stage_leaves_sibling_parts_stored() {
        let cases = [
            (Fault::Open, Stage::Open),
            (Fault::Read, Stage::Checksum),
            (Fault::Seek, Stage::Rewind),
            (Fault::SecondRead, Stage::Copy),
        ];
        for (fault, stage) in cases {
            let temp = tempdir().expect("tempdir");
            let ingestor = make_ingestor(temp.path());
            let parts = [
                FaultyPart::healthy("first.txt", b"one"),
                FaultyPart::failing("second.txt", b"two", fault),
                FaultyPart::healthy("third.txt", b"three"),
            ];

            let outcomes = ingestor.ingest_parts(&parts).await;

            assert_eq!(outcomes.len(), 3, "{fault:?}");
            let err = outcomes[1].result.as_ref().expect_err("middle part fails");
            assert_eq!(err.stage, stage, "{fault:?}");
            assert_eq!(outcomes[1].original_name, "second.txt");
            let siblings = [(&outcomes[0], b"one".as_slice()), (&outcomes[2], b"three".as_slice())];
            for (outcome, content) in siblings {
                let stored = outcome.result.as_ref().expect("sibling stored");
                let written = fs::read(&stored.path).await.expect("read");
                assert_eq!(written, content, "{fault:?}");
                assert_eq!(stored.checksum, Checksum::of(content));
            }
            assert_eq!(file_count(temp.path()), 2, "{fault:?}");
        }
    }

    #[tokio::test]
    async fn empty_and_non_empty_parts_get_distinct_names() {
        let temp = tempdir().expect("tempdir");
        let ingestor = make_ingestor(temp.path());
        let form = UploadForm::new(vec![
            memory_part("part.bin", b""),
            memory_part("part.bin", b"data"),
        ]);

        let outcomes = ingestor.ingest_all(&form).await;
        let names: Vec<_> = outcomes
            .iter()
            .map(|outcome| outcome.result.as_ref().expect("stored").file_name.clone())
            .collect();

        assert_eq!(
            names,
            vec![
                "2024-01-01 00.00.00 +0000 d41d8cd98f00b204e9800998ecf8427e part.bin",
                "2024-01-01 00.00.00 +0000 8d777f385d3dfec8815d20f7496026dc part.bin",
            ]
        );
        assert_eq!(fs::read(temp.path().join(&names[0])).await.expect("read"), b"");
        assert_eq!(fs::read(temp.path().join(&names[1])).await.expect("read"), b"data");
    }

    #[tokio::test]
    async fn spilled_parts_are_read_twice_from_disk() {
        let temp = tempdir().expect("tempdir");
        let ingestor = make_ingestor(temp.path());
        let mut spilled = tempfile::tempfile().expect("tempfile");
        std::io::Write::write_all(&mut spilled, b"hello").expect("write");
        let part = FilePart::new(
            "file",
            "report.txt",
            PartContent::Disk {
                file: spilled,
                len: 5,
            },
        );

        let stored = ingestor.ingest(&part).await.expect("ingest");
        assert_eq!(stored.file_name, HELLO_NAME);
        assert_eq!(fs::read(&stored.path).await.expect("read"), b"hello");
    }
}
