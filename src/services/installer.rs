use camino::{Utf8Path, Utf8PathBuf};
use futures_util::StreamExt;
use reqwest::Client;
use std::convert::Infallible;
use std::fs;
use std::io::{self, Write};
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Name of the archive written next to the installation while downloading.
const ARCHIVE_NAME: &str = "update.zip";

/// A download that delivers nothing for this long is abandoned.
const STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while downloading, unpacking or restarting into an update
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Download failed: {0}")]
    Download(String),

    #[error("Download failed with HTTP {0}")]
    HttpStatus(u16),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Archive is unreadable: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Installation was interrupted: {0}")]
    Interrupted(String),

    #[error("Failed to restart: {0}")]
    Restart(#[source] io::Error),
}

/// Cumulative download progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub downloaded: u64,

    /// Size announced by the server, if any.
    pub total: Option<u64>,
}

impl DownloadProgress {
    /// Completed fraction in `[0.0, 1.0]`, or `None` when the size is unknown.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.downloaded as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}

/// Proof that an update was unpacked; required to restart into it.
#[derive(Debug)]
pub struct InstalledUpdate {
    target_dir: Utf8PathBuf,
    files: usize,
}

impl InstalledUpdate {
    pub fn target_dir(&self) -> &Utf8Path {
        &self.target_dir
    }

    pub fn files(&self) -> usize {
        self.files
    }
}

/// Downloads a release archive and unpacks it over the installation.
///
/// There is no rollback: if extraction fails halfway, files already written
/// stay in place.
pub struct UpdateInstaller {
    client: Client,
    target_dir: Utf8PathBuf,
}

impl UpdateInstaller {
    pub fn new(
        target_dir: impl Into<Utf8PathBuf>,
        connect_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        // No overall timeout: archives can take a while on slow links, so
        // only connecting and stalls are bounded
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()?;

        Ok(Self {
            client,
            target_dir: target_dir.into(),
        })
    }

    pub fn target_dir(&self) -> &Utf8Path {
        &self.target_dir
    }

    /// Stream `url` into `dest`, reporting cumulative progress after every chunk.
    ///
    /// Returns the number of bytes written.
    pub async fn download<F>(
        &self,
        url: &str,
        dest: &Utf8Path,
        mut on_progress: F,
    ) -> Result<u64, InstallError>
    where
        F: FnMut(DownloadProgress),
    {
        tracing::info!("Downloading update from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| InstallError::Download(e.to_string()))?;

        if !response.status().is_success() {
            return Err(InstallError::HttpStatus(response.status().as_u16()));
        }

        let total = response.content_length().filter(|len| *len > 0);
        let mut file = fs::File::create(dest).map_err(|source| InstallError::Io {
            path: dest.to_path_buf(),
            source,
        })?;

        let mut downloaded: u64 = 0;
        on_progress(DownloadProgress { downloaded, total });

        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(STALL_TIMEOUT, stream.next())
                .await
                .map_err(|_| {
                    InstallError::Download(format!("no data received for {:?}", STALL_TIMEOUT))
                })?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| InstallError::Download(e.to_string()))?;
            file.write_all(&chunk).map_err(|source| InstallError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
            downloaded += chunk.len() as u64;
            on_progress(DownloadProgress { downloaded, total });
        }

        file.flush().map_err(|source| InstallError::Io {
            path: dest.to_path_buf(),
            source,
        })?;

        tracing::info!("Downloaded {} bytes to {}", downloaded, dest);
        Ok(downloaded)
    }

    /// Download `url`, unpack it over the installation and delete the archive.
    ///
    /// Extraction only starts after the download finished without error.
    pub async fn apply<F>(
        &self,
        url: &str,
        on_progress: F,
    ) -> Result<InstalledUpdate, InstallError>
    where
        F: FnMut(DownloadProgress),
    {
        fs::create_dir_all(&self.target_dir).map_err(|source| InstallError::Io {
            path: self.target_dir.clone(),
            source,
        })?;

        let archive = self.target_dir.join(ARCHIVE_NAME);
        self.download(url, &archive, on_progress).await?;

        let target_dir = self.target_dir.clone();
        let archive_path = archive.clone();
        let files = tokio::task::spawn_blocking(move || install(&archive_path, &target_dir))
            .await
            .map_err(|e| InstallError::Interrupted(e.to_string()))??;

        if let Err(e) = fs::remove_file(&archive) {
            tracing::warn!("Failed to remove {}: {}", archive, e);
        }

        Ok(InstalledUpdate {
            target_dir: self.target_dir.clone(),
            files,
        })
    }
}

/// Extract the zip archive at `archive` over `target_dir`.
///
/// Entries whose paths would escape `target_dir` are skipped. Returns the
/// number of files written.
pub fn install(archive: &Utf8Path, target_dir: &Utf8Path) -> Result<usize, InstallError> {
    tracing::info!("Installing {} into {}", archive, target_dir);

    let file = fs::File::open(archive).map_err(|source| InstallError::Io {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut zip = zip::ZipArchive::new(file)?;

    let mut written = 0;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let Some(relative) = entry.enclosed_name().map(|p| p.to_owned()) else {
            tracing::warn!("Skipping unsafe archive entry: {}", entry.name());
            continue;
        };
        let out_path = target_dir.as_std_path().join(relative);
        let display_path = Utf8PathBuf::from(out_path.to_string_lossy().into_owned());
        let io_err = |source| InstallError::Io {
            path: display_path.clone(),
            source,
        };

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(io_err)?;
            continue;
        }

        let parent = out_path.parent().unwrap_or(target_dir.as_std_path());
        fs::create_dir_all(parent).map_err(io_err)?;

        // Written beside the destination and renamed over it, so a running
        // executable is replaced rather than truncated
        let mut staged = NamedTempFile::new_in(parent).map_err(io_err)?;
        io::copy(&mut entry, staged.as_file_mut()).map_err(io_err)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(staged.path(), fs::Permissions::from_mode(mode))
                .map_err(io_err)?;
        }

        staged
            .persist(&out_path)
            .map_err(|e| io_err(e.error))?;

        written += 1;
    }

    tracing::info!("Extracted {} files", written);
    Ok(written)
}

/// Replace the running process with a fresh launch of the same program and
/// arguments.
///
/// Only returns on failure, in which case the current process keeps running
/// the old version.
pub fn restart(installed: InstalledUpdate) -> Result<Infallible, InstallError> {
    let exe = std::env::current_exe().map_err(InstallError::Restart)?;
    let args: Vec<std::ffi::OsString> = std::env::args_os().skip(1).collect();

    tracing::info!(
        "Restarting {} after installing {} files into {}",
        exe.display(),
        installed.files,
        installed.target_dir
    );

    relaunch(&exe, &args)
}

#[cfg(unix)]
fn relaunch(
    exe: &std::path::Path,
    args: &[std::ffi::OsString],
) -> Result<Infallible, InstallError> {
    use std::os::unix::process::CommandExt;
    let err = std::process::Command::new(exe).args(args).exec();
    Err(InstallError::Restart(err))
}

#[cfg(not(unix))]
fn relaunch(
    exe: &std::path::Path,
    args: &[std::ffi::OsString],
) -> Result<Infallible, InstallError> {
    std::process::Command::new(exe)
        .args(args)
        .spawn()
        .map_err(InstallError::Restart)?;
    std::process::exit(0)
}
