use ratatui::{
    Frame,
    layout::{Constraint, Flex, Layout, Position, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{
        Block, Cell, Clear, Paragraph, Row, Scrollbar, ScrollbarOrientation, ScrollbarState,
        Table, Wrap,
    },
};
use tracing::trace;

use crate::model::{ColumnView, Model, UIData};

pub const CMDLINE_HEIGH: usize = 1;
pub const FILTERBAR_HEIGHT: usize = 1;
pub const TABLE_HEADER_HEIGHT: usize = 1;
pub const COLUMN_WIDTH_MARGIN: usize = 2;
pub const SCROLLBAR_WIDTH: usize = 1;

#[derive(Default)]
pub struct UI {}

impl UI {
    pub fn draw(&mut self, model: &Model, frame: &mut Frame) {
        let uidata = model.get_uidata();
        let [filter_area, table_area, status_area] = Layout::vertical([
            Constraint::Length(FILTERBAR_HEIGHT as u16),
            Constraint::Min(0),
            Constraint::Length(CMDLINE_HEIGH as u16),
        ])
        .areas(frame.area());

        self.draw_filterbar(uidata, frame, filter_area);
        self.draw_table_area(uidata, frame, table_area);
        self.draw_statusline(uidata, frame, status_area);

        if uidata.show_popup {
            self.draw_popup(uidata, frame);
        }
    }

    fn draw_filterbar(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let mut spans = vec![Span::from(format!(" {} ", uidata.name)).bold().reversed()];
        if uidata.filter_chips.is_empty() {
            spans.push(Span::from(" no filters").dim());
        }
        for chip in uidata.filter_chips.iter() {
            spans.push(Span::from(" "));
            spans.push(Span::from(format!("[{chip}]")).fg(Color::Yellow));
        }
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_table_area(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        if let Some(message) = &uidata.empty_message {
            let [centered] = Layout::vertical([Constraint::Length(1)])
                .flex(Flex::Center)
                .areas(area);
            frame.render_widget(Paragraph::new(message.as_str()).centered().italic(), centered);
            return;
        }

        let index_width = if uidata.index.width > 0 {
            uidata.layout.index_width as u16
        } else {
            0
        };
        let [index_area, table_area, scrollbar_area] = Layout::horizontal([
            Constraint::Length(index_width),
            Constraint::Min(0),
            Constraint::Length(SCROLLBAR_WIDTH as u16),
        ])
        .areas(area);

        if index_width > 0 {
            let index = self.build_table(
                std::slice::from_ref(&uidata.index),
                Some(uidata.selected_row),
                None,
            );
            frame.render_widget(index.dim(), index_area);
        }
        let table = self.build_table(
            &uidata.table,
            Some(uidata.selected_row),
            Some(uidata.selected_column),
        );
        frame.render_widget(table, table_area);

        let mut scrollbar_state = ScrollbarState::new(uidata.nrows).position(uidata.abs_selected_row);
        frame.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight)
                .begin_symbol(None)
                .end_symbol(None),
            scrollbar_area,
            &mut scrollbar_state,
        );
    }

    fn build_table<'a>(
        &self,
        columns: &'a [ColumnView],
        selected_row: Option<usize>,
        selected_column: Option<usize>,
    ) -> Table<'a> {
        let nrows = columns.iter().map(|c| c.data.len()).max().unwrap_or(0);
        let header = Row::new(
            columns
                .iter()
                .map(|c| Cell::from(c.name.as_str()))
                .collect::<Vec<Cell>>(),
        )
        .style(Style::new().add_modifier(Modifier::BOLD | Modifier::UNDERLINED));

        let rows: Vec<Row> = (0..nrows)
            .map(|ridx| {
                let cells: Vec<Cell> = columns
                    .iter()
                    .enumerate()
                    .map(|(cidx, c)| {
                        let cell = Cell::from(c.data.get(ridx).map(|s| s.as_str()).unwrap_or(""));
                        if Some(ridx) == selected_row && Some(cidx) == selected_column {
                            cell.reversed()
                        } else {
                            cell
                        }
                    })
                    .collect();
                let row = Row::new(cells);
                if Some(ridx) == selected_row {
                    row.bg(Color::DarkGray)
                } else {
                    row
                }
            })
            .collect();

        let widths: Vec<Constraint> = columns
            .iter()
            .map(|c| Constraint::Length(c.width as u16))
            .collect();
        Table::new(rows, widths).header(header).column_spacing(1)
    }

    fn draw_statusline(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        if uidata.active_cmdinput {
            let line = Line::from(vec![
                Span::from(uidata.cmd_prompt.as_str()).bold(),
                Span::from(uidata.cmdinput.input.as_str()),
            ]);
            frame.render_widget(Paragraph::new(line), area);
            let x = area.x as usize + uidata.cmd_prompt.chars().count() + uidata.cmdinput.curser_pos;
            frame.set_cursor_position(Position::new(
                std::cmp::min(x, area.right().saturating_sub(1) as usize) as u16,
                area.y,
            ));
            return;
        }

        let position = self.position_text(uidata);
        let [message_area, position_area] = Layout::horizontal([
            Constraint::Min(0),
            Constraint::Length(position.chars().count() as u16),
        ])
        .areas(area);
        frame.render_widget(Paragraph::new(uidata.status_message.as_str()), message_area);
        frame.render_widget(Paragraph::new(position).reversed(), position_area);
    }

    fn position_text(&self, uidata: &UIData) -> String {
        if uidata.nrows == 0 {
            return format!(" 0 of {} ", uidata.total_rows);
        }
        let first = uidata.page_index * uidata.page_size + 1;
        let last = std::cmp::min(first + uidata.page_size - 1, uidata.nrows);
        let filtered = if uidata.nrows != uidata.total_rows {
            format!(" (filtered from {})", uidata.total_rows)
        } else {
            String::new()
        };
        format!(
            " {first}-{last} of {}{filtered} | page {}/{} ",
            uidata.nrows,
            uidata.page_index + 1,
            uidata.page_count.max(1)
        )
    }

    fn draw_popup(&self, uidata: &UIData, frame: &mut Frame) {
        trace!("Drawing popup {}", uidata.popup_title);
        let [area] = Layout::horizontal([Constraint::Percentage(70)])
            .flex(Flex::Center)
            .areas(frame.area());
        let [area] = Layout::vertical([Constraint::Percentage(80)])
            .flex(Flex::Center)
            .areas(area);

        let block = Block::bordered()
            .title(Line::from(format!(" {} ", uidata.popup_title)).centered().bold())
            .title_bottom(Line::from(" <esc> close ").centered());
        let popup = Paragraph::new(uidata.popup_message.as_str())
            .wrap(Wrap { trim: false })
            .block(block);
        frame.render_widget(Clear, area);
        frame.render_widget(popup, area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::AttributeDescriptor;
    use crate::config::TableConfiguration;
    use crate::domain::{Message, RTVConfig};
    use crate::model::TableSource;
    use crate::state::MemoryStore;
    use crate::values::{Field, RecordData, RowValue};
    use ratatui::{Terminal, backend::TestBackend};

    fn render(model: &Model, width: u16, height: u16) -> Vec<String> {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        let mut ui = UI::default();
        terminal.draw(|f| ui.draw(model, f)).unwrap();
        let buffer = terminal.backend().buffer();
        buffer
            .content
            .chunks(width as usize)
            .map(|line| line.iter().map(|c| c.symbol()).collect::<String>())
            .collect()
    }

    fn model(genes: &[&str]) -> Model {
        let mut model = Model::init(&RTVConfig::default(), Box::new(MemoryStore::default()), 60, 12);
        let data = RecordData::new(vec![Field {
            name: "gene".into(),
            values: genes.iter().map(|g| RowValue::Text(g.to_string())).collect(),
        }]);
        model
            .open_table(TableSource {
                id: "genes".into(),
                name: "genes".into(),
                data,
                attributes: vec![AttributeDescriptor::new("gene")],
                config: TableConfiguration::default().can_filter(true),
            })
            .unwrap();
        model
    }

    #[test]
    fn table_with_header_and_position() {
        let model = model(&["APOE", "BIN1"]);
        let lines = render(&model, 60, 12);
        assert!(lines[0].contains("genes"));
        assert!(lines[1].contains("gene"));
        assert!(lines[2].contains("APOE"));
        assert!(lines[3].contains("BIN1"));
        assert!(lines[11].contains("1-2 of 2 | page 1/1"));
    }

    #[test]
    fn empty_table_shows_no_data() {
        let model = model(&[]);
        let lines = render(&model, 60, 12);
        assert!(lines.iter().any(|l| l.contains("No data available")));
    }

    #[test]
    fn help_popup() {
        let mut model = model(&["APOE"]);
        model.update(Some(Message::Help)).unwrap();
        let lines = render(&model, 60, 12);
        assert!(lines.iter().any(|l| l.contains("Help")));
        assert!(lines.iter().any(|l| l.contains("Navigation")));
    }
}
