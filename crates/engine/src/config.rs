use serde::{Deserialize, Serialize};

/// Configuration for log parsing behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Keep the verbatim, categorised line buffer on every tool run
    pub keep_line_buffer: bool,

    /// Parse independent sections in parallel on the rayon pool
    pub parallel_sections: bool,

    /// Inputs with more lines than this are rejected (and degrade to an empty result)
    pub max_input_lines: usize,

    /// Number of leading lines inspected to guess the tool when no invocation marker exists
    pub tool_guess_window: usize,

    /// Maximum number of characters of decoded file-copy content kept per copy
    pub max_decoded_content: usize,

    /// Number of leading bytes inspected by the pre-check
    pub precheck_bytes: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            keep_line_buffer: true,
            parallel_sections: false,
            max_input_lines: 5_000_000,
            tool_guess_window: 20,
            max_decoded_content: 64 * 1024,
            precheck_bytes: 4096,
        }
    }
}

impl ParserConfig {
    /// Create config for an interactive viewer (keeps every line)
    pub fn for_display() -> Self {
        Self::default()
    }

    /// Create config for summaries (drops the line buffer, parses sections in parallel)
    pub fn for_summary() -> Self {
        Self {
            keep_line_buffer: false,
            parallel_sections: true,
            max_decoded_content: 4096,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_input_lines == 0 {
            return Err("max_input_lines must be > 0".to_string());
        }

        if self.tool_guess_window == 0 {
            return Err("tool_guess_window must be > 0".to_string());
        }

        if self.precheck_bytes == 0 {
            return Err("precheck_bytes must be > 0".to_string());
        }

        Ok(())
    }
}
