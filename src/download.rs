use indicatif::{ProgressBar, ProgressStyle};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use zip::ZipArchive;

use crate::error::{Error, Result, format_backend_error};
use crate::session::Session;
use crate::util::{backoff, retriable_status};

/// Transfer settings shared by the download paths.
#[derive(Debug, Clone)]
pub(crate) struct Transfer {
    /// Attempts per file (1 = no retry).
    pub(crate) retry_max: usize,
    pub(crate) sleep_max: Duration,
    pub(crate) progress: bool,
}

impl Default for Transfer {
    fn default() -> Self {
        Self {
            retry_max: 1,
            sleep_max: Duration::from_secs(120),
            progress: true,
        }
    }
}

fn part_path(target: &Path) -> PathBuf {
    let mut name: OsString = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn progress_bar(enabled: bool, len: Option<u64>, position: u64) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let pb = match len {
        Some(len) => ProgressBar::new(len),
        None => ProgressBar::new_spinner(),
    };
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    pb.set_position(position);
    Some(pb)
}

/// Streams `url` into `target` through a `.part` file, resuming with a Range
/// request when an attempt is cut short. Existing targets are kept unless
/// `overwrite` is set.
pub(crate) fn download_file<S: Session + ?Sized>(
    session: &S,
    url: &str,
    target: &Path,
    overwrite: bool,
    transfer: &Transfer,
) -> Result<PathBuf> {
    if target.exists() && !overwrite {
        log::info!("{} already exists, skipping download", target.display());
        return Ok(target.to_path_buf());
    }

    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let part = part_path(target);
    let mut downloaded: u64 = if part.exists() {
        std::fs::metadata(&part)?.len()
    } else {
        0
    };
    let mut sleep = Duration::from_secs(1).min(transfer.sleep_max);
    let mut tries = 0usize;
    let retry_max = transfer.retry_max.max(1);

    'download_attempt: while tries < retry_max {
        let range_from = if downloaded > 0 { Some(downloaded) } else { None };
        let mut stream = session.get_stream(url, range_from)?;

        if !(200..300).contains(&stream.status) {
            tries += 1;
            if retriable_status(stream.status) && tries < retry_max {
                thread::sleep(sleep);
                sleep = backoff(sleep, transfer.sleep_max);
                continue;
            }
            let mut body = Vec::new();
            stream.reader.read_to_end(&mut body).ok();
            return Err(format_backend_error(stream.status, url, &body));
        }

        // A 200 to a Range request means the server sent the whole file.
        let resumed = range_from.is_some() && stream.status == 206;
        if !resumed {
            downloaded = 0;
        }
        let total = stream.content_length.map(|len| len + downloaded);

        let mut out = OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(&part)?;

        let pb = progress_bar(transfer.progress, total, downloaded);

        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = match stream.reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tries += 1;
                    if tries >= retry_max {
                        return Err(Error::Io(e));
                    }

                    // resume
                    out.flush().ok();
                    downloaded = std::fs::metadata(&part)?.len();
                    log::warn!("download of {} interrupted ({}), resuming", url, e);
                    thread::sleep(sleep);
                    sleep = backoff(sleep, transfer.sleep_max);
                    continue 'download_attempt;
                }
            };

            out.write_all(&buf[..n])?;
            downloaded += n as u64;
            if let Some(pb) = &pb {
                pb.inc(n as u64);
            }
        }

        out.flush()?;
        drop(out);

        if total.is_none_or(|total| downloaded >= total) {
            if let Some(pb) = &pb {
                pb.finish_and_clear();
            }
            std::fs::rename(&part, target)?;
            log::debug!("downloaded {} ({} bytes)", target.display(), downloaded);
            return Ok(target.to_path_buf());
        }

        tries += 1;
        thread::sleep(sleep);
        sleep = backoff(sleep, transfer.sleep_max);
    }

    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("download of {} incomplete: {} byte(s) received", url, downloaded),
    )))
}

/// Extracts every file of a zip archive directly into `destination`,
/// dropping the archive's directory structure.
pub(crate) fn extract_zip(archive: &Path, destination: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(destination)?;
    let mut zip = ZipArchive::new(File::open(archive)?)?;

    let mut paths = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name())
            .map(|n| n.to_owned())
        else {
            log::warn!("skipping archive entry with unsafe path `{}`", entry.name());
            continue;
        };

        let out_path = destination.join(name);
        if out_path.exists() && !overwrite {
            log::info!("{} already exists, not extracting", out_path.display());
        } else {
            let mut out = File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out)?;
        }
        paths.push(out_path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ByteStream, HttpResponse, RequestBody};
    use std::io::Cursor;
    use std::sync::Mutex;

    struct Flaky {
        data: Vec<u8>,
        // Bytes served by the first attempt before failing.
        cut_at: usize,
        calls: Mutex<Vec<Option<u64>>>,
    }

    struct FailAfter {
        inner: Cursor<Vec<u8>>,
    }

    impl Read for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.inner.read(buf)?;
            if n == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
            }
            Ok(n)
        }
    }

    impl Session for Flaky {
        fn get(&self, _url: &str, _query: &[(String, String)]) -> Result<HttpResponse> {
            unreachable!()
        }

        fn post(&self, _url: &str, _body: RequestBody) -> Result<HttpResponse> {
            unreachable!()
        }

        fn get_stream(&self, _url: &str, range_from: Option<u64>) -> Result<ByteStream> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(range_from);
            if calls.len() == 1 {
                return Ok(ByteStream {
                    status: 200,
                    content_length: Some(self.data.len() as u64),
                    reader: Box::new(FailAfter { inner: Cursor::new(self.data[..self.cut_at].to_vec()) }),
                });
            }
            let from = range_from.unwrap_or(0) as usize;
            Ok(ByteStream {
                status: 206,
                content_length: Some((self.data.len() - from) as u64),
                reader: Box::new(Cursor::new(self.data[from..].to_vec())),
            })
        }
    }

    fn quiet(retry_max: usize) -> Transfer {
        Transfer { retry_max, sleep_max: Duration::ZERO, progress: false }
    }

    #[test]
    fn interrupted_download_resumes_with_range() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("granule.h5");
        let session = Flaky { data: (0..200u8).collect(), cut_at: 80, calls: Mutex::new(vec![]) };

        let path = download_file(&session, "https://x/granule.h5", &target, false, &quiet(2)).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), session.data);
        assert_eq!(*session.calls.lock().unwrap(), vec![None, Some(80)]);
        assert!(!part_path(&target).exists());
    }

    #[test]
    fn without_retries_interruptions_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("granule.h5");
        let session = Flaky { data: vec![1; 10], cut_at: 5, calls: Mutex::new(vec![]) };
        let err = download_file(&session, "https://x/granule.h5", &target, false, &quiet(1));
        assert!(matches!(err, Err(Error::Io(_))));
        assert!(!target.exists());
    }

    #[test]
    fn existing_targets_are_kept_unless_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("granule.h5");
        std::fs::write(&target, b"old").unwrap();
        let session = Flaky { data: vec![], cut_at: 0, calls: Mutex::new(vec![]) };
        download_file(&session, "https://x/granule.h5", &target, false, &quiet(1)).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"old");
        assert!(session.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn zip_entries_are_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("5000001.zip");
        {
            let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
            let opts = zip::write::FileOptions::default();
            writer.add_directory("5000001/", opts).unwrap();
            writer.start_file("5000001/processed_ATL06_a.h5", opts).unwrap();
            writer.write_all(b"a").unwrap();
            writer.start_file("5000001/processed_ATL06_b.h5", opts).unwrap();
            writer.write_all(b"b").unwrap();
            writer.finish().unwrap();
        }

        let out = dir.path().join("out");
        let paths = extract_zip(&archive, &out, false).unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(std::fs::read(out.join("processed_ATL06_b.h5")).unwrap(), b"b");
    }
}
