use crate::prelude::*;

pub fn display(lines: &[String]) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if let Err(err) = write_lines(&mut out, lines) {
        warn!("writing to stdout failed: {}", err);
    }
}

pub fn write_lines<W: Write>(out: &mut W, lines: &[String]) -> std::io::Result<()> {
    for line in lines {
        writeln!(out, "{}", line)?;
    }
    out.flush()
}
