use clap::ValueEnum;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Full parse result as pretty-printed JSON
    #[default]
    Json,
    /// Per-run counts as compact JSON
    Counts,
    /// Markdown summary for humans
    Summary,
}

impl OutputFormat {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Counts => "counts",
            OutputFormat::Summary => "summary",
        }
    }

    /// Whether the output needs the verbatim line buffer at all
    pub(crate) const fn needs_lines(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}
