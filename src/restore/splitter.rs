// dumptool/src/restore/splitter.rs
use std::io::{self, BufRead};

/// One complete statement and the 1-based line it ended on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub line: usize,
}

/// What replay should do with a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Execute(String),
    Skip,
}

/// Line-oriented splitter for the dump format.
///
/// Not a SQL parser: a statement ends at any line whose trimmed text ends
/// with `;`. Blank lines, `--` comments and plain `/* */` comment lines are
/// dropped; version-guarded `/*!` lines are kept.
pub struct StatementSplitter<R> {
    reader: R,
    line: usize,
    current: String,
    buf: Vec<u8>,
    done: bool,
}

impl<R: BufRead> StatementSplitter<R> {
    pub fn new(reader: R) -> Self {
        StatementSplitter {
            reader,
            line: 0,
            current: String::new(),
            buf: Vec::new(),
            done: false,
        }
    }

    pub fn next_statement(&mut self) -> io::Result<Option<Statement>> {
        if self.done {
            return Ok(None);
        }
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
                self.done = true;
                // Unterminated trailing text still runs as a final statement.
                let rest = std::mem::take(&mut self.current);
                let rest = rest.trim();
                if rest.is_empty() || rest == ";" {
                    return Ok(None);
                }
                return Ok(Some(Statement { sql: rest.to_string(), line: self.line }));
            }
            self.line += 1;

            let text = String::from_utf8_lossy(&self.buf);
            let line = text.trim();
            if is_ignorable(line) {
                continue;
            }

            if !self.current.is_empty() {
                self.current.push('\n');
            }
            self.current.push_str(line);

            if line.ends_with(';') {
                let sql = std::mem::take(&mut self.current);
                if sql.trim() == ";" {
                    continue;
                }
                return Ok(Some(Statement { sql, line: self.line }));
            }
        }
    }
}

impl<R: BufRead> Iterator for StatementSplitter<R> {
    type Item = io::Result<Statement>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_statement().transpose()
    }
}

fn is_ignorable(line: &str) -> bool {
    line.is_empty() || line.starts_with("--") || (line.starts_with("/*") && !line.starts_with("/*!"))
}

/// Decides whether a statement reaches the server.
///
/// `LOCK TABLES` / `UNLOCK TABLES` are dropped since the restore runs on a
/// single session. A whole-statement version guard `/*!NNNNN sql */;` runs
/// its inner SQL only for versions starting with 40 or 50.
pub fn classify(statement: &str) -> Action {
    let stmt = statement.trim();
    if stmt.is_empty() || stmt == ";" {
        return Action::Skip;
    }

    let upper_prefix: String = stmt.chars().take(13).collect::<String>().to_ascii_uppercase();
    if upper_prefix.starts_with("LOCK TABLES") || upper_prefix.starts_with("UNLOCK TABLES") {
        return Action::Skip;
    }

    if let Some(inner) = stmt.strip_prefix("/*!").and_then(|s| s.strip_suffix("*/;")) {
        let version = match inner.get(..5) {
            Some(v) if inner.len() > 5 => v,
            _ => return Action::Skip,
        };
        if !(version.starts_with("40") || version.starts_with("50")) {
            return Action::Skip;
        }
        let sql = inner[5..].trim();
        return if sql.is_empty() { Action::Skip } else { Action::Execute(sql.to_string()) };
    }

    Action::Execute(stmt.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn split(input: &str) -> anyhow::Result<Vec<Statement>> {
        Ok(StatementSplitter::new(Cursor::new(input)).collect::<io::Result<Vec<_>>>()?)
    }

    #[test]
    fn test_splits_on_trailing_semicolon_and_skips_comments() -> anyhow::Result<()> {
        let input = "-- header\n\
                     /* plain comment */\n\
                     \n\
                     /*!40101 SET NAMES utf8mb4 */;\n\
                     CREATE TABLE `t` (\n  `id` int\n);\n\
                     INSERT INTO `t` (`id`) VALUES\n(1),\n(2);\n";
        let statements = split(input)?;
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], Statement { sql: "/*!40101 SET NAMES utf8mb4 */;".into(), line: 4 });
        assert_eq!(statements[1].sql, "CREATE TABLE `t` (\n`id` int\n);");
        assert_eq!(statements[1].line, 7);
        assert_eq!(statements[2].sql, "INSERT INTO `t` (`id`) VALUES\n(1),\n(2);");
        assert_eq!(statements[2].line, 10);
        Ok(())
    }

    #[test]
    fn test_trailing_unterminated_statement_is_returned() -> anyhow::Result<()> {
        let statements = split("SELECT 1;\nSELECT 2\n")?;
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1], Statement { sql: "SELECT 2".into(), line: 2 });

        assert!(split("")?.is_empty());
        assert!(split(";\n-- only a comment\n")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_semicolon_inside_line_does_not_split() -> anyhow::Result<()> {
        let statements = split("INSERT INTO `t` VALUES ('a;b'),\n('c');\n")?;
        assert_eq!(statements.len(), 1);
        Ok(())
    }

    #[test]
    fn test_classify_lock_statements_are_skipped() {
        assert_eq!(classify("LOCK TABLES `t` WRITE;"), Action::Skip);
        assert_eq!(classify("unlock tables;"), Action::Skip);
        assert_eq!(classify("  "), Action::Skip);
        assert_eq!(classify("DROP TABLE IF EXISTS `t`;"), Action::Execute("DROP TABLE IF EXISTS `t`;".into()));
    }

    #[test]
    fn test_classify_version_guards() {
        assert_eq!(classify("/*!50001 SELECT 1*/;"), Action::Execute("SELECT 1".into()));
        assert_eq!(
            classify("/*!40101 SET @OLD_CHARACTER_SET_CLIENT=@@CHARACTER_SET_CLIENT */;"),
            Action::Execute("SET @OLD_CHARACTER_SET_CLIENT=@@CHARACTER_SET_CLIENT".into())
        );
        assert_eq!(classify("/*!99999 SELECT 2*/;"), Action::Skip);
        assert_eq!(classify("/*!80000 SELECT 3*/;"), Action::Skip);
        assert_eq!(classify("/*!50001*/;"), Action::Skip);
    }
}
