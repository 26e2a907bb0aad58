use flate2::read::MultiGzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, Read};
use std::time::Duration;

/// Path that selects standard input
pub const STDIN: &str = "-";

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";
const SPINNER_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec})";

/// Byte source for the segmenter
pub struct Input {
    reader: Box<dyn Read + Send>,
    progress: Option<ProgressBar>,
}

impl Input {
    /// Wraps an already open reader, e.g. for tests
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Input {
            reader: Box::new(reader),
            progress: None,
        }
    }

    /// Removes the progress indicator from the terminal
    pub fn finish(&self) {
        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }
    }
}

impl Read for Input {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

/// Opens `path` (or stdin for `-`), optionally gunzipping it.
///
/// With `progress` the raw bytes read are shown on stderr, as a bar when the
/// size is known and as a spinner otherwise. Compressed input counts its
/// compressed bytes.
pub fn open(path: &str, gzip: bool, progress: bool) -> io::Result<Input> {
    let (raw, size): (Box<dyn Read + Send>, Option<u64>) = if path == STDIN {
        (Box::new(io::stdin()), None)
    } else {
        let file = File::open(path)?;
        let size = file.metadata().ok().map(|m| m.len());
        (Box::new(file), size)
    };

    let bar = progress.then(|| progress_bar(size));
    let counted: Box<dyn Read + Send> = match &bar {
        Some(bar) => Box::new(bar.wrap_read(raw)),
        None => raw,
    };
    let reader: Box<dyn Read + Send> = if gzip {
        Box::new(MultiGzDecoder::new(counted))
    } else {
        counted
    };

    Ok(Input {
        reader,
        progress: bar,
    })
}

fn progress_bar(size: Option<u64>) -> ProgressBar {
    let (bar, template) = match size {
        Some(len) => (ProgressBar::new(len), BAR_TEMPLATE),
        None => (ProgressBar::new_spinner(), SPINNER_TEMPLATE),
    };
    if let Ok(style) = ProgressStyle::with_template(template) {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar.enable_steady_tick(Duration::from_millis(200));
    bar
}
