//! XML serialization of a catalog
//!
//! The document carries an inline `xs:schema` describing every table, followed by one
//! element per row. Null cells are omitted.

use std::fmt::Write;

use crate::schema::METADATA_DATASET_NAME;
use crate::{DataSet, DataTable, DataType, Value};

const XS_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";
const MSDATA_NAMESPACE: &str = "urn:schemas-microsoft-com:xml-msdata";

impl DataSet {
    /// Serialize to UTF-8 XML bytes
    pub fn write_xml(&self) -> Vec<u8> {
        self.to_xml_string().into_bytes()
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::with_capacity(1024 + self.total_rows() * 256);

        out.push_str("<?xml version=\"1.0\" standalone=\"yes\"?>\n");
        let _ = writeln!(out, "<{}>", METADATA_DATASET_NAME);
        write_schema(&mut out, self);

        for table in self.tables() {
            write_rows(&mut out, table);
        }

        let _ = writeln!(out, "</{}>", METADATA_DATASET_NAME);
        out
    }
}

fn write_schema(out: &mut String, dataset: &DataSet) {
    let _ = writeln!(
        out,
        "  <xs:schema id=\"{name}\" xmlns=\"\" xmlns:xs=\"{XS_NAMESPACE}\" xmlns:msdata=\"{MSDATA_NAMESPACE}\">",
        name = METADATA_DATASET_NAME
    );
    let _ = writeln!(
        out,
        "    <xs:element name=\"{}\" msdata:IsDataSet=\"true\">",
        METADATA_DATASET_NAME
    );
    out.push_str("      <xs:complexType>\n");
    out.push_str("        <xs:choice minOccurs=\"0\" maxOccurs=\"unbounded\">\n");

    for table in dataset.tables() {
        let _ = writeln!(out, "          <xs:element name=\"{}\">", escape(table.name()));
        out.push_str("            <xs:complexType>\n");
        out.push_str("              <xs:sequence>\n");

        for column in table.columns() {
            let guid = if column.data_type() == DataType::Guid {
                " msdata:DataType=\"System.Guid, mscorlib\""
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "                <xs:element name=\"{}\"{} type=\"{}\" minOccurs=\"0\" />",
                escape(column.name()),
                guid,
                column.data_type().xsd_type()
            );
        }

        out.push_str("              </xs:sequence>\n");
        out.push_str("            </xs:complexType>\n");
        out.push_str("          </xs:element>\n");
    }

    out.push_str("        </xs:choice>\n");
    out.push_str("      </xs:complexType>\n");
    out.push_str("    </xs:element>\n");
    out.push_str("  </xs:schema>\n");
}

fn write_rows(out: &mut String, table: &DataTable) {
    let name = escape(table.name());

    for row in table.rows() {
        let _ = writeln!(out, "  <{}>", name);

        for column in table.columns() {
            let value = row.value(column.index());
            if value.is_null() {
                continue;
            }
            let element = escape(column.name());
            let _ = writeln!(
                out,
                "    <{}>{}</{}>",
                element,
                escape(&format_value(value)),
                element
            );
        }

        let _ = writeln!(out, "  </{}>", name);
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
        other => other.to_string(),
    }
}

/// Escape text for element content and attribute values
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}
