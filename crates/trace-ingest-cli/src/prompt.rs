use std::io::{self, BufRead, Write};

/// Ask a yes/no question on the terminal. An empty answer means no.
pub fn confirm_on_terminal(question: &str) -> io::Result<bool> {
    let stdin = io::stdin();
    confirm(&mut stdin.lock(), &mut io::stdout(), question)
}

/// Ask until the answer is recognisable. Closed input counts as no, so a
/// destructive command never proceeds unattended.
pub fn confirm<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    question: &str,
) -> io::Result<bool> {
    let mut answer = String::new();
    loop {
        write!(output, "{} (y/N): ", question)?;
        output.flush()?;

        answer.clear();
        if input.read_line(&mut answer)? == 0 {
            writeln!(output)?;
            return Ok(false);
        }
        match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "" | "n" | "no" => return Ok(false),
            other => writeln!(output, "Please answer y or n (got {:?})", other)?,
        }
    }
}
