//! Diagnostic output for the content read back by the workflow

/// Sink for the text read back from storage
pub trait Reporter {
    fn report(&mut self, content: &str);
}

/// Prints to stdout
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report(&mut self, content: &str) {
        println!("{}", content);
    }
}

/// Keeps every reported line, for inspection in tests
#[derive(Debug, Default)]
pub struct MemoryReporter {
    pub lines: Vec<String>,
}

impl Reporter for MemoryReporter {
    fn report(&mut self, content: &str) {
        self.lines.push(content.to_string());
    }
}
