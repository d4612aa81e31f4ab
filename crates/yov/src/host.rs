//! The OS shim contract (§6.2): every observable effect the runtime can
//! cause — stdout, filesystem, process spawn, environment, prompts, the
//! console — goes through a single `Host` trait object, so the rest of the
//! crate never touches `std::io`/`std::process`/`std::fs` directly.
//!
//! Grounded on the teacher's `PrintWriter` family (`StdPrint`,
//! `CollectStringPrint`, `NoPrint`): the same "swap the sink, keep the
//! interpreter untouched" shape, generalised from stdout-only to the whole
//! ambient-OS surface.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Severity passed to [`Host::print`], mirroring the original's
/// `PrintLevel` (user code output vs. interpreter-internal diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintLevel {
    UserCode,
    Info,
    Error,
}

/// How a spawned process's stdout should be handled, per §6.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// Inherit the interpreter's own console.
    Console,
    /// Discard the child's output.
    Ignore,
    /// Capture it into the `Script`/`CallOutput` the intrinsic returns.
    Script,
    /// Import the child's resulting environment variables (used by the
    /// `msvc_import_env_*` intrinsics).
    ImportEnv,
}

/// The result of a process/script spawn intrinsic.
#[derive(Debug, Clone, Default)]
pub struct CallOutput {
    pub stdout: String,
    pub exit_code: i32,
    pub imported_env: Vec<(String, String)>,
}

/// Metadata about a single file or directory entry, as returned by
/// `file_get_info`/`dir_get_files_info`.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_directory: bool,
    pub size_bytes: u64,
}

/// An I/O-shaped failure from a `Host` operation; carried into the
/// intrinsic's `Result.message` rather than aborting execution, per §7
/// tier 3 (structured `Result`).
#[derive(Debug, Clone)]
pub struct HostError(pub String);

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for HostError {}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

pub type HostResult<T> = Result<T, HostError>;

/// The OS shim a concrete embedder supplies; §6.2 lists its contract
/// points. `yov-cli` wires [`NativeHost`]; tests use [`InMemoryHost`].
pub trait Host {
    fn print(&mut self, level: PrintLevel, text: &str);
    fn console_clear(&mut self);
    fn console_set_cursor(&mut self, row: u16, col: u16);
    fn console_get_cursor(&self) -> (u16, u16);

    fn ask_yes_no(&mut self, prompt: &str) -> bool;

    fn env_get(&self, name: &str) -> Option<String>;

    fn working_dir(&self) -> PathBuf;
    fn path_is_absolute(&self, path: &Path) -> bool {
        path.is_absolute()
    }
    fn path_exists(&self, path: &Path) -> bool;

    fn read_entire_file(&self, path: &Path) -> HostResult<String>;
    fn write_entire_file(&mut self, path: &Path, contents: &str) -> HostResult<()>;
    fn copy_file(&mut self, dst: &Path, src: &Path, overwrite: bool) -> HostResult<()>;
    fn move_file(&mut self, dst: &Path, src: &Path) -> HostResult<()>;
    fn delete_file(&mut self, path: &Path) -> HostResult<()>;
    fn file_info(&self, path: &Path) -> HostResult<FileInfo>;

    fn create_directory(&mut self, path: &Path, recursive: bool) -> HostResult<()>;
    fn delete_directory(&mut self, path: &Path) -> HostResult<()>;
    fn copy_directory(&mut self, dst: &Path, src: &Path) -> HostResult<()>;
    fn move_directory(&mut self, dst: &Path, src: &Path) -> HostResult<()>;
    fn dir_files_info(&self, path: &Path) -> HostResult<Vec<FileInfo>>;

    fn spawn(&mut self, working_dir: &Path, command_line: &str, redirect: RedirectMode) -> HostResult<CallOutput>;
    fn spawn_exe(&mut self, working_dir: &Path, exe: &str, args: &str, redirect: RedirectMode) -> HostResult<CallOutput>;

    fn thread_sleep(&mut self, duration: Duration);
}

/// The concrete OS shim `yov-cli` wires: stdout, real filesystem, real
/// process spawn, real environment.
#[derive(Debug, Default)]
pub struct NativeHost {
    cursor: (u16, u16),
    auto_confirm: bool,
}

impl NativeHost {
    #[must_use]
    pub fn new(auto_confirm: bool) -> Self {
        Self { cursor: (0, 0), auto_confirm }
    }
}

impl Host for NativeHost {
    fn print(&mut self, level: PrintLevel, text: &str) {
        match level {
            PrintLevel::UserCode | PrintLevel::Info => print!("{text}"),
            PrintLevel::Error => eprint!("{text}"),
        }
    }

    fn console_clear(&mut self) {
        print!("\x1b[2J\x1b[H");
    }

    fn console_set_cursor(&mut self, row: u16, col: u16) {
        self.cursor = (row, col);
        print!("\x1b[{};{}H", row + 1, col + 1);
    }

    fn console_get_cursor(&self) -> (u16, u16) {
        self.cursor
    }

    fn ask_yes_no(&mut self, prompt: &str) -> bool {
        if self.auto_confirm {
            return true;
        }
        use std::io::Write as _;
        print!("{prompt} [y/N] ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }

    fn env_get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn working_dir(&self) -> PathBuf {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_entire_file(&self, path: &Path) -> HostResult<String> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn write_entire_file(&mut self, path: &Path, contents: &str) -> HostResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(std::fs::write(path, contents)?)
    }

    fn copy_file(&mut self, dst: &Path, src: &Path, overwrite: bool) -> HostResult<()> {
        if !overwrite && dst.exists() {
            return Err(HostError(format!("destination already exists: {}", dst.display())));
        }
        std::fs::copy(src, dst)?;
        Ok(())
    }

    fn move_file(&mut self, dst: &Path, src: &Path) -> HostResult<()> {
        Ok(std::fs::rename(src, dst)?)
    }

    fn delete_file(&mut self, path: &Path) -> HostResult<()> {
        Ok(std::fs::remove_file(path)?)
    }

    fn file_info(&self, path: &Path) -> HostResult<FileInfo> {
        let metadata = std::fs::metadata(path)?;
        Ok(FileInfo {
            name: path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            path: path.to_path_buf(),
            is_directory: metadata.is_dir(),
            size_bytes: metadata.len(),
        })
    }

    fn create_directory(&mut self, path: &Path, recursive: bool) -> HostResult<()> {
        if recursive { std::fs::create_dir_all(path)? } else { std::fs::create_dir(path)? }
        Ok(())
    }

    fn delete_directory(&mut self, path: &Path) -> HostResult<()> {
        Ok(std::fs::remove_dir_all(path)?)
    }

    fn copy_directory(&mut self, dst: &Path, src: &Path) -> HostResult<()> {
        copy_dir_recursive(src, dst)
    }

    fn move_directory(&mut self, dst: &Path, src: &Path) -> HostResult<()> {
        if std::fs::rename(src, dst).is_ok() {
            return Ok(());
        }
        copy_dir_recursive(src, dst)?;
        Ok(std::fs::remove_dir_all(src)?)
    }

    fn dir_files_info(&self, path: &Path) -> HostResult<Vec<FileInfo>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            out.push(FileInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                is_directory: metadata.is_dir(),
                size_bytes: metadata.len(),
            });
        }
        Ok(out)
    }

    fn spawn(&mut self, working_dir: &Path, command_line: &str, redirect: RedirectMode) -> HostResult<CallOutput> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next().ok_or_else(|| HostError("empty command line".into()))?;
        self.spawn_exe(working_dir, program, &command_line[program.len()..], redirect)
    }

    fn spawn_exe(&mut self, working_dir: &Path, exe: &str, args: &str, redirect: RedirectMode) -> HostResult<CallOutput> {
        let mut command = std::process::Command::new(exe);
        command.current_dir(working_dir);
        for arg in args.split_whitespace() {
            command.arg(arg);
        }
        match redirect {
            RedirectMode::Console => {
                let status = command.status()?;
                Ok(CallOutput { stdout: String::new(), exit_code: status.code().unwrap_or(-1), imported_env: Vec::new() })
            }
            RedirectMode::Ignore => {
                command.stdout(std::process::Stdio::null()).stderr(std::process::Stdio::null());
                let status = command.status()?;
                Ok(CallOutput { stdout: String::new(), exit_code: status.code().unwrap_or(-1), imported_env: Vec::new() })
            }
            RedirectMode::Script | RedirectMode::ImportEnv => {
                let output = command.output()?;
                Ok(CallOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    exit_code: output.status.code().unwrap_or(-1),
                    imported_env: Vec::new(),
                })
            }
        }
    }

    fn thread_sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> HostResult<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

/// An in-memory `Host` used by tests: a virtual filesystem rooted at `/`,
/// captured stdout, and scripted yes/no answers. No real process spawn is
/// attempted; `spawn`/`spawn_exe` return a canned [`CallOutput`].
#[derive(Debug, Default)]
pub struct InMemoryHost {
    pub stdout: String,
    pub stderr: String,
    files: std::collections::HashMap<PathBuf, String>,
    dirs: std::collections::HashSet<PathBuf>,
    env: std::collections::HashMap<String, String>,
    cwd: PathBuf,
    pub auto_confirm: bool,
    cursor: (u16, u16),
}

impl InMemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self { cwd: PathBuf::from("/"), auto_confirm: true, dirs: [PathBuf::from("/")].into_iter().collect(), ..Self::default() }
    }

    pub fn set_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.env.insert(name.into(), value.into());
    }

    pub fn seed_file(&mut self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.files.insert(path.into(), contents.into());
    }
}

impl Host for InMemoryHost {
    fn print(&mut self, level: PrintLevel, text: &str) {
        match level {
            PrintLevel::UserCode | PrintLevel::Info => self.stdout.push_str(text),
            PrintLevel::Error => self.stderr.push_str(text),
        }
    }

    fn console_clear(&mut self) {}

    fn console_set_cursor(&mut self, row: u16, col: u16) {
        self.cursor = (row, col);
    }

    fn console_get_cursor(&self) -> (u16, u16) {
        self.cursor
    }

    fn ask_yes_no(&mut self, _prompt: &str) -> bool {
        self.auto_confirm
    }

    fn env_get(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned()
    }

    fn working_dir(&self) -> PathBuf {
        self.cwd.clone()
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path)
    }

    fn read_entire_file(&self, path: &Path) -> HostResult<String> {
        self.files.get(path).cloned().ok_or_else(|| HostError(format!("no such file: {}", path.display())))
    }

    fn write_entire_file(&mut self, path: &Path, contents: &str) -> HostResult<()> {
        self.files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn copy_file(&mut self, dst: &Path, src: &Path, overwrite: bool) -> HostResult<()> {
        if !overwrite && self.files.contains_key(dst) {
            return Err(HostError(format!("destination already exists: {}", dst.display())));
        }
        let content = self.read_entire_file(src)?;
        self.files.insert(dst.to_path_buf(), content);
        Ok(())
    }

    fn move_file(&mut self, dst: &Path, src: &Path) -> HostResult<()> {
        let content = self.files.remove(src).ok_or_else(|| HostError(format!("no such file: {}", src.display())))?;
        self.files.insert(dst.to_path_buf(), content);
        Ok(())
    }

    fn delete_file(&mut self, path: &Path) -> HostResult<()> {
        self.files.remove(path).map(|_| ()).ok_or_else(|| HostError(format!("no such file: {}", path.display())))
    }

    fn file_info(&self, path: &Path) -> HostResult<FileInfo> {
        if let Some(content) = self.files.get(path) {
            return Ok(FileInfo {
                name: path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
                path: path.to_path_buf(),
                is_directory: false,
                size_bytes: content.len() as u64,
            });
        }
        if self.dirs.contains(path) {
            return Ok(FileInfo { name: String::new(), path: path.to_path_buf(), is_directory: true, size_bytes: 0 });
        }
        Err(HostError(format!("no such path: {}", path.display())))
    }

    fn create_directory(&mut self, path: &Path, _recursive: bool) -> HostResult<()> {
        self.dirs.insert(path.to_path_buf());
        Ok(())
    }

    fn delete_directory(&mut self, path: &Path) -> HostResult<()> {
        self.dirs.retain(|d| d != path && !d.starts_with(path));
        self.files.retain(|f, _| !f.starts_with(path));
        Ok(())
    }

    fn copy_directory(&mut self, dst: &Path, src: &Path) -> HostResult<()> {
        self.dirs.insert(dst.to_path_buf());
        let entries: Vec<_> = self.files.iter().filter(|(p, _)| p.starts_with(src)).map(|(p, c)| (p.clone(), c.clone())).collect();
        for (path, content) in entries {
            let relative = path.strip_prefix(src).unwrap_or(&path);
            self.files.insert(dst.join(relative), content);
        }
        Ok(())
    }

    fn move_directory(&mut self, dst: &Path, src: &Path) -> HostResult<()> {
        self.copy_directory(dst, src)?;
        self.delete_directory(src)
    }

    fn dir_files_info(&self, path: &Path) -> HostResult<Vec<FileInfo>> {
        let mut out = Vec::new();
        for file in self.files.keys().filter(|p| p.parent() == Some(path)) {
            out.push(self.file_info(file)?);
        }
        Ok(out)
    }

    fn spawn(&mut self, _working_dir: &Path, _command_line: &str, _redirect: RedirectMode) -> HostResult<CallOutput> {
        Ok(CallOutput::default())
    }

    fn spawn_exe(&mut self, _working_dir: &Path, _exe: &str, _args: &str, _redirect: RedirectMode) -> HostResult<CallOutput> {
        Ok(CallOutput::default())
    }

    fn thread_sleep(&mut self, _duration: Duration) {}
}
