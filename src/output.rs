use crate::parser::Session;
use crate::render::Template;
use std::io::{self, BufWriter, ErrorKind, Write};

pub const OUTPUT_BUFFER_BYTES: usize = 16 * 1024;

/// Downstream consumer of the sessions that pass the filter
pub trait SessionSink: Send {
    fn accept(&mut self, session: Session) -> io::Result<()>;

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// True when the reader on the other end went away, e.g. `| head`
pub fn is_broken_pipe(err: &io::Error) -> bool {
    err.kind() == ErrorKind::BrokenPipe
}

/// Writes one rendered template line per session
pub struct TemplateSink<W: Write> {
    template: Template,
    out: BufWriter<W>,
    line: String,
}

impl<W: Write> TemplateSink<W> {
    /// Without `buffered` every line reaches the writer immediately
    pub fn new(template: Template, writer: W, buffered: bool) -> Self {
        let capacity = if buffered { OUTPUT_BUFFER_BYTES } else { 0 };
        TemplateSink {
            template,
            out: BufWriter::with_capacity(capacity, writer),
            line: String::new(),
        }
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.out.into_inner().map_err(|e| e.into_error())
    }
}

impl<W: Write + Send> SessionSink for TemplateSink<W> {
    fn accept(&mut self, session: Session) -> io::Result<()> {
        self.line.clear();
        self.template.format_into(&session, &mut self.line);
        self.line.push('\n');
        self.out.write_all(self.line.as_bytes())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// One JSON object per line
pub struct JsonSink<W: Write> {
    out: BufWriter<W>,
}

impl<W: Write> JsonSink<W> {
    pub fn new(writer: W, buffered: bool) -> Self {
        let capacity = if buffered { OUTPUT_BUFFER_BYTES } else { 0 };
        JsonSink {
            out: BufWriter::with_capacity(capacity, writer),
        }
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.out.into_inner().map_err(|e| e.into_error())
    }
}

impl<W: Write + Send> SessionSink for JsonSink<W> {
    fn accept(&mut self, session: Session) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, &session)?;
        self.out.write_all(b"\n")
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Collects sessions in memory
impl SessionSink for Vec<Session> {
    fn accept(&mut self, session: Session) -> io::Result<()> {
        self.push(session);
        Ok(())
    }
}
