//! Result and payload format identifiers.
//!
//! The format selects how parameter values are framed on upload and how the
//! response byte stream parses into [`Record`][crate::record::Record]s.
//! The codec implementations themselves are external collaborators, only the
//! identifiers and the minimal reader the response needs live in this crate.

/// Serialization format of a query result or an external table payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Format {
    /// Binary rows prefixed by a column name and type header.
    #[default]
    RowBinaryWithNamesAndTypes,
    /// Binary rows without a schema header.
    RowBinary,
    /// Comma separated text.
    Csv,
    /// Comma separated text with a header line.
    CsvWithNames,
    /// Tab separated text.
    Tsv,
    /// Tab separated text with a header line.
    TsvWithNames,
}

impl Format {
    /// Wire name passed to the server.
    pub const fn as_str(self) -> &'static str {
        match self {
            Format::RowBinaryWithNamesAndTypes => "RowBinaryWithNamesAndTypes",
            Format::RowBinary => "RowBinary",
            Format::Csv => "CSV",
            Format::CsvWithNames => "CSVWithNames",
            Format::Tsv => "TabSeparated",
            Format::TsvWithNames => "TabSeparatedWithNames",
        }
    }

    pub const fn is_binary(self) -> bool {
        matches!(self, Format::RowBinaryWithNamesAndTypes | Format::RowBinary)
    }

    /// Returns `true` if the payload starts with a schema header.
    pub const fn has_header(self) -> bool {
        matches!(
            self,
            Format::RowBinaryWithNamesAndTypes | Format::CsvWithNames | Format::TsvWithNames
        )
    }

    /// Field delimiter for the text formats.
    pub(crate) const fn delimiter(self) -> u8 {
        match self {
            Format::Csv | Format::CsvWithNames => b',',
            _ => b'\t',
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
