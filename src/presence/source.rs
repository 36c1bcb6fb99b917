use std::{collections::VecDeque, fs, path::PathBuf};

use anyhow::{bail, Context, Result};

/// A face/presence classifier polled once per tick.
///
/// `sample` runs on the blocking pool under a timeout, so implementations may do
/// device I/O directly.
pub trait PresenceSource: Send {
    /// Acquires the device. Failing here aborts session start.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn sample(&mut self) -> Result<bool>;

    /// Releases the device. Called once when sampling stops.
    fn release(&mut self) {}
}

/// Builds a fresh source for each session.
pub trait PresenceSourceFactory: Send + Sync {
    fn create(&self, user_id: &str) -> Result<Box<dyn PresenceSource>>;
}

impl<F> PresenceSourceFactory for F
where
    F: Fn(&str) -> Result<Box<dyn PresenceSource>> + Send + Sync,
{
    fn create(&self, user_id: &str) -> Result<Box<dyn PresenceSource>> {
        self(user_id)
    }
}

/// Replays a fixed sequence of readings, then repeats `fallback`.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    readings: VecDeque<bool>,
    fallback: bool,
}

impl ScriptedSource {
    pub fn new(readings: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            fallback,
        }
    }
}

impl PresenceSource for ScriptedSource {
    fn sample(&mut self) -> Result<bool> {
        Ok(self.readings.pop_front().unwrap_or(self.fallback))
    }
}

/// Reads presence from a small file kept up to date by an external detector
/// process: `1`, `true` or `present` mean a face is in view.
#[derive(Debug, Clone)]
pub struct FlagFileSource {
    path: PathBuf,
}

impl FlagFileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl PresenceSource for FlagFileSource {
    fn open(&mut self) -> Result<()> {
        if !self.path.exists() {
            bail!("presence feed {} does not exist", self.path.display());
        }
        Ok(())
    }

    fn sample(&mut self) -> Result<bool> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read presence feed {}", self.path.display()))?;
        Ok(parse_flag(&contents))
    }
}

fn parse_flag(contents: &str) -> bool {
    let value = contents.trim();
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("present")
}

#[derive(Debug, Clone)]
pub struct FlagFileFactory {
    path: PathBuf,
}

impl FlagFileFactory {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl PresenceSourceFactory for FlagFileFactory {
    fn create(&self, _user_id: &str) -> Result<Box<dyn PresenceSource>> {
        Ok(Box::new(FlagFileSource::new(self.path.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_scripted_source_replays_then_falls_back() -> Result<()> {
        let mut source = ScriptedSource::new([true, false], true);
        assert!(source.sample()?);
        assert!(!source.sample()?);
        assert!(source.sample()?);
        assert!(source.sample()?);
        Ok(())
    }

    #[test]
    fn test_flag_file_source() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("presence");
        let mut source = FlagFileSource::new(path.clone());
        assert!(source.open().is_err());

        fs::write(&path, "1\n")?;
        source.open()?;
        assert!(source.sample()?);

        fs::write(&path, "0")?;
        assert!(!source.sample()?);

        fs::write(&path, "Present")?;
        assert!(source.sample()?);

        fs::remove_file(&path)?;
        assert!(source.sample().is_err());
        Ok(())
    }

    #[test]
    fn test_closure_factory() -> Result<()> {
        let factory = |_: &str| -> Result<Box<dyn PresenceSource>> {
            Ok(Box::new(ScriptedSource::new([], false)))
        };
        let mut source = factory.create("u1")?;
        assert!(!source.sample()?);
        Ok(())
    }
}
