use std::io::{self, Write};

use crate::source::CounterPoint;

const NAME_COLUMN_WIDTH: usize = 30;

/// Writes the field listing report: one line per point with its fully-qualified name and description.
///
/// The names listed are the ones accepted by field filter patterns.
///
/// # Errors
///
/// If writing to `out` fails, an error is returned.
pub fn write_field_list<'a, W, I>(out: &mut W, program: &str, points: I) -> io::Result<()>
where
    W: Write + ?Sized,
    I: IntoIterator<Item = &'a CounterPoint>,
{
    writeln!(out, "{} -f option fields:", program)?;
    writeln!(out, "{:<width$} Description", "Field name", width = NAME_COLUMN_WIDTH)?;
    writeln!(out, "{:<width$} -----------", "----------", width = NAME_COLUMN_WIDTH)?;

    for point in points {
        writeln!(out, "{:<width$} {}", point.qualified_name(), point.description, width = NAME_COLUMN_WIDTH)?;
    }

    out.flush()
}
