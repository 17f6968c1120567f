// dumptool/src/backup/writer.rs
use chrono::Local;
use std::io::{self, Write};

pub const TOOL_NAME: &str = "dumptool";

/// Writes the SQL dump format section by section.
///
/// Layout: header, FK-disable, per-table structure and data, per-view
/// structure, FK-enable. The restore splitter relies on every statement
/// ending with `;` at the end of a line.
pub struct DumpWriter<W: Write> {
    out: W,
}

impl<W: Write> DumpWriter<W> {
    pub fn new(out: W) -> Self {
        DumpWriter { out }
    }

    pub fn write_header(&mut self, host: &str, database: &str) -> io::Result<()> {
        write!(
            self.out,
            "-- MySQL dump created by {tool}\n\
             -- Host: {host}    Database: {database}\n\
             -- ------------------------------------------------------\n\
             -- Dump started on {started}\n\
             \n\
             /*!40101 SET @OLD_CHARACTER_SET_CLIENT=@@CHARACTER_SET_CLIENT */;\n\
             /*!40101 SET @OLD_CHARACTER_SET_RESULTS=@@CHARACTER_SET_RESULTS */;\n\
             /*!40101 SET @OLD_COLLATION_CONNECTION=@@COLLATION_CONNECTION */;\n\
             /*!50503 SET NAMES utf8mb4 */;\n\
             /*!40103 SET @OLD_TIME_ZONE=@@TIME_ZONE */;\n\
             /*!40103 SET TIME_ZONE='+00:00' */;\n\
             /*!40014 SET @OLD_UNIQUE_CHECKS=@@UNIQUE_CHECKS, UNIQUE_CHECKS=0 */;\n\
             /*!40101 SET @OLD_SQL_MODE=@@SQL_MODE, SQL_MODE='NO_AUTO_VALUE_ON_ZERO' */;\n\
             /*!40111 SET @OLD_SQL_NOTES=@@SQL_NOTES, SQL_NOTES=0 */;\n\
             \n",
            tool = TOOL_NAME,
            host = host,
            database = database,
            started = Local::now().format("%Y-%m-%d %H:%M:%S"),
        )?;
        self.out.write_all(b"SET FOREIGN_KEY_CHECKS=0;\n\n")
    }

    pub fn write_table_structure(&mut self, table: &str, create_sql: &str) -> io::Result<()> {
        write!(
            self.out,
            "--\n-- Table structure for table {table}\n--\n\n\
             DROP TABLE IF EXISTS {table};\n\
             {ddl};\n\n",
            table = quote_identifier(table),
            ddl = create_sql.trim_end().trim_end_matches(';'),
        )
    }

    pub fn begin_table_data(&mut self, table: &str) -> io::Result<()> {
        write!(
            self.out,
            "--\n-- Dumping data for table {table}\n--\n\n\
             LOCK TABLES {table} WRITE;\n",
            table = quote_identifier(table)
        )
    }

    /// One multi-row INSERT; `rows` are already rendered `(..)` tuples.
    pub fn write_insert(&mut self, table: &str, columns: &[String], rows: &[String]) -> io::Result<()> {
        write!(
            self.out,
            "INSERT INTO {} ({}) VALUES\n{};\n",
            quote_identifier(table),
            columns.join(", "),
            rows.join(",\n")
        )
    }

    pub fn end_table_data(&mut self) -> io::Result<()> {
        self.out.write_all(b"UNLOCK TABLES;\n\n")
    }

    pub fn write_view(&mut self, view: &str, create_sql: &str) -> io::Result<()> {
        write!(
            self.out,
            "--\n-- View structure for view {view}\n--\n\n\
             DROP VIEW IF EXISTS {view};\n\
             {ddl};\n\n",
            view = quote_identifier(view),
            ddl = create_sql.trim_end().trim_end_matches(';'),
        )
    }

    pub fn write_footer(&mut self) -> io::Result<()> {
        write!(
            self.out,
            "\nSET FOREIGN_KEY_CHECKS=1;\n\
             -- Dump completed on {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Quotes an identifier with backticks, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Accumulates rendered rows and emits an INSERT whenever `batch_size`
/// rows are pending. The data section is opened lazily so a table with no
/// rows writes nothing at all.
pub struct InsertBatcher<'a> {
    table: &'a str,
    columns: &'a [String],
    batch_size: usize,
    pending: Vec<String>,
    opened: bool,
    pub rows_written: u64,
}

impl<'a> InsertBatcher<'a> {
    pub fn new(table: &'a str, columns: &'a [String], batch_size: usize) -> Self {
        InsertBatcher {
            table,
            columns,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            opened: false,
            rows_written: 0,
        }
    }

    pub fn push<W: Write>(&mut self, writer: &mut DumpWriter<W>, row: String) -> io::Result<()> {
        if !self.opened {
            writer.begin_table_data(self.table)?;
            self.opened = true;
        }
        self.pending.push(row);
        self.rows_written += 1;
        if self.pending.len() >= self.batch_size {
            writer.write_insert(self.table, self.columns, &self.pending)?;
            self.pending.clear();
        }
        Ok(())
    }

    pub fn finish<W: Write>(mut self, writer: &mut DumpWriter<W>) -> io::Result<u64> {
        if !self.pending.is_empty() {
            writer.write_insert(self.table, self.columns, &self.pending)?;
            self.pending.clear();
        }
        if self.opened {
            writer.end_table_data()?;
        }
        Ok(self.rows_written)
    }
}
