use nu_ansi_term::{Color, Style};
use qmodel::model::ExplainNode;
use std::io::IsTerminal;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Theme {
    Auto,
    Plain,
}

/// Terminal renderer for command reports.
pub struct Ui {
    palette: Palette,
}

/// Words of a rendered model that start a new clause.
const CLAUSE_KEYWORDS: [&str; 6] = ["from", "where", "orderby", "join", "select", "=>"];

impl Ui {
    pub fn new(theme: Theme) -> Self {
        let paint = theme == Theme::Auto && std::io::stdout().is_terminal();

        #[cfg(windows)]
        if paint {
            let _ = nu_ansi_term::enable_ansi_support();
        }

        let palette = if paint {
            Palette::dark()
        } else {
            Palette::plain()
        };
        Self { palette }
    }

    pub fn spacer(&self) {
        println!();
    }

    /// `key: value` rows, keys right-aligned.
    pub fn fields(&self, title: &str, rows: &[(&str, &str)]) {
        if rows.is_empty() {
            return;
        }
        self.heading(title);
        let width = rows.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
        for (key, value) in rows {
            println!(
                "  {} {}",
                self.palette.key.paint(format!("{key:>width$}:")),
                self.palette.value.paint(*value)
            );
        }
    }

    /// A rendered model with its clause keywords highlighted, one clause per
    /// line.
    pub fn query(&self, title: &str, rendered: &str) {
        self.heading(title);
        let mut line = String::new();
        for word in rendered.split(' ') {
            if CLAUSE_KEYWORDS.contains(&word) && !line.is_empty() {
                println!("  {line}");
                line.clear();
            }
            if !line.is_empty() {
                line.push(' ');
            }
            if CLAUSE_KEYWORDS.contains(&word) {
                line.push_str(&self.palette.keyword.paint(word).to_string());
            } else {
                line.push_str(word);
            }
        }
        if !line.is_empty() {
            println!("  {line}");
        }
    }

    pub fn list<I>(&self, title: &str, entries: I)
    where
        I: IntoIterator<Item = String>,
    {
        let entries: Vec<String> = entries.into_iter().collect();
        if entries.is_empty() {
            return;
        }
        self.heading(title);
        for entry in entries {
            println!("  {} {entry}", self.palette.bullet.paint(self.palette.bullet_glyph));
        }
    }

    /// Explain tree, stage names highlighted and properties dimmed.
    pub fn explain(&self, title: &str, root: &ExplainNode) {
        self.heading(title);
        self.explain_node(root, 1);
    }

    fn explain_node(&self, node: &ExplainNode, depth: usize) {
        let props = if node.props.is_empty() {
            String::new()
        } else {
            let rendered: Vec<String> = node
                .props
                .iter()
                .map(|prop| format!("{}={}", prop.key, prop.value))
                .collect();
            format!(" {}", self.palette.detail.paint(format!("[{}]", rendered.join(", "))))
        };
        println!(
            "{}{}{props}",
            "  ".repeat(depth),
            self.palette.stage.paint(node.op.as_str())
        );
        for input in &node.inputs {
            self.explain_node(input, depth + 1);
        }
    }

    fn heading(&self, title: &str) {
        println!("{}", self.palette.heading.paint(format!("{HEADING_ICON} {title}")));
    }
}

struct Palette {
    heading: Style,
    key: Style,
    value: Style,
    keyword: Style,
    stage: Style,
    detail: Style,
    bullet: Style,
    bullet_glyph: &'static str,
}

impl Palette {
    fn dark() -> Self {
        Self {
            heading: Style::new().fg(Color::Purple).bold(),
            key: Style::new().fg(Color::LightBlue).bold(),
            value: Style::new().fg(Color::White),
            keyword: Style::new().fg(Color::Yellow).bold(),
            stage: Style::new().fg(Color::Cyan).bold(),
            detail: Style::new().fg(Color::DarkGray),
            bullet: Style::new().fg(Color::LightBlue),
            bullet_glyph: "•",
        }
    }

    fn plain() -> Self {
        Self {
            heading: Style::new(),
            key: Style::new(),
            value: Style::new(),
            keyword: Style::new(),
            stage: Style::new(),
            detail: Style::new(),
            bullet: Style::new(),
            bullet_glyph: "-",
        }
    }
}

const HEADING_ICON: &str = "▸";
