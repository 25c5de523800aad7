use std::time::Duration;

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Position, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols::border,
    text::{Line, Span},
    widgets::{
        Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState,
        Wrap,
    },
};

use crate::domain::CMDMode;
use crate::model::{GeneratorData, PickerData, ResultsData, UIData, View};

pub const CMDLINE_HEIGH: usize = 1;
pub const TABLE_BORDER_WIDTH: usize = 1;
pub const COLUMN_WIDTH_MARGIN: usize = 2;
const STATUS_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

const GENERATOR_HINT: &str = " <Enter> select  <g> generate  <f> JSON filter  <c> clear  <Tab> results  <?> help  <q> quit";
const RESULTS_HINT: &str = " </> search  <s/S> sort  <PgDn/PgUp> page  <z> page size  <e> export  <y> copy  <Esc> back  <?> help";

pub struct ReportUI;

impl ReportUI {
    pub fn draw(&self, uidata: &UIData, frame: &mut Frame) {
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(1),
                Constraint::Length(CMDLINE_HEIGH as u16),
            ])
            .split(frame.area());

        match uidata.view {
            View::Generator => draw_generator(&uidata.generator, frame, layout[0]),
            View::Results => draw_results(&uidata.results, frame, layout[0]),
        }
        self.draw_cmdline(uidata, frame, layout[1]);

        if let Some(picker) = &uidata.picker {
            draw_picker(picker, frame);
        }
        if uidata.show_popup {
            draw_popup(&uidata.popup_message, frame);
        }
    }

    fn draw_cmdline(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        if uidata.active_cmdinput {
            let prefix = match uidata.cmd_mode {
                Some(CMDMode::Search) => "/",
                Some(CMDMode::FilterJson) => "filter> ",
                Some(CMDMode::Limit) => "limit> ",
                None => "> ",
            };
            let line = Line::from(vec![
                Span::styled(prefix, Style::default().fg(Color::Yellow)),
                Span::raw(uidata.cmdinput.input.as_str()),
            ]);
            frame.render_widget(Paragraph::new(line), area);

            let x = area.x + (prefix.chars().count() + uidata.cmdinput.curser_pos) as u16;
            frame.set_cursor_position(Position::new(x.min(area.right().saturating_sub(1)), area.y));
            return;
        }

        let line = if uidata.last_status_message_update.elapsed() < STATUS_MESSAGE_TIMEOUT
            && !uidata.status_message.is_empty()
        {
            Line::from(format!(" {}", uidata.status_message)).yellow()
        } else {
            let hint = match uidata.view {
                View::Generator => GENERATOR_HINT,
                View::Results => RESULTS_HINT,
            };
            Line::from(hint).dark_gray()
        };
        frame.render_widget(Paragraph::new(line), area);
    }
}

fn draw_generator(data: &GeneratorData, frame: &mut Frame, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(area);

    let label_width = data
        .controls
        .iter()
        .map(|c| c.label.chars().count())
        .max()
        .unwrap_or(0);
    let items: Vec<ListItem> = data
        .controls
        .iter()
        .map(|c| {
            let value_style = if c.enabled {
                Style::default()
            } else {
                Style::default().fg(Color::DarkGray)
            };
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:<label_width$}  ", c.label),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
                Span::styled(c.value.clone(), value_style),
            ]))
        })
        .collect();
    let controls = List::new(items)
        .block(
            Block::bordered()
                .title(Line::from(" Report generator ".bold()).centered())
                .border_set(border::THICK),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut state = ListState::default().with_selected(Some(data.selected));
    frame.render_stateful_widget(controls, chunks[0], &mut state);

    let mut lines: Vec<Line> = Vec::new();
    if !data.stats.is_empty() {
        lines.push(Line::from("Collection".bold()));
        lines.extend(data.stats.iter().map(|s| Line::from(format!("  {s}"))));
        lines.push(Line::default());
    }
    lines.push(Line::from("Active filters".bold()));
    match &data.json_filter {
        Some(json) => lines.push(Line::from(format!("  JSON {json}")).cyan()),
        None if data.active_filters.is_empty() => lines.push(Line::from("  none").dark_gray()),
        None => lines.extend(data.active_filters.iter().map(|f| Line::from(format!("  {f}")))),
    }
    if data.loading {
        lines.push(Line::default());
        lines.push(Line::from("Generating report ...").yellow());
    }
    let info = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(" Details "));
    frame.render_widget(info, chunks[1]);
}

fn draw_results(data: &ResultsData, frame: &mut Frame, area: Rect) {
    let block = Block::bordered()
        .title(Line::from(format!(" {} ", data.title).bold()).centered())
        .title_bottom(Line::from(format!(" {} ", data.page_line)).centered())
        .border_set(border::THICK);

    if data.no_data {
        let message = Paragraph::new("No data to display").centered().block(block);
        frame.render_widget(message, area);
        return;
    }

    let header = Row::new(data.columns.iter().map(|c| Cell::from(c.name.clone())))
        .style(Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED));
    let nrows = data.columns.first().map(|c| c.data.len()).unwrap_or(0);
    let rows = (0..nrows).map(|row| {
        Row::new(
            data.columns
                .iter()
                .map(|c| Cell::from(visible_cell(&c.data[row], c.width))),
        )
    });
    let widths = data.columns.iter().map(|c| Constraint::Length(c.width as u16));

    let table = Table::new(rows, widths)
        .header(header)
        .block(block)
        .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .column_highlight_style(Style::default().fg(Color::Cyan))
        .cell_highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::REVERSED | Modifier::BOLD),
        );
    let mut state = TableState::default()
        .with_selected(Some(data.selected_row))
        .with_selected_column(Some(data.selected_column));
    frame.render_stateful_widget(table, area, &mut state);
}

// Cuts a cell to its column, marking the cut with an ellipsis.
fn visible_cell(value: &str, width: usize) -> String {
    let chars = value.chars().count();
    if chars <= width || width == 0 {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

fn draw_picker(picker: &PickerData, frame: &mut Frame) {
    let area = centered_rect(frame.area(), 50, 60);
    let items: Vec<ListItem> = picker
        .options
        .iter()
        .map(|o| ListItem::new(o.as_str()))
        .collect();
    let list = List::new(items)
        .block(
            Block::bordered()
                .title(Line::from(format!(" {} ", picker.title).bold()).centered())
                .title_bottom(Line::from(" <Enter> select  <Esc> cancel ").centered())
                .border_set(border::THICK),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut state = ListState::default().with_selected(Some(picker.selected));

    frame.render_widget(Clear, area);
    frame.render_stateful_widget(list, area, &mut state);
}

fn draw_popup(message: &str, frame: &mut Frame) {
    let area = centered_rect(frame.area(), 60, 60);
    let popup = Paragraph::new(message)
        .wrap(Wrap { trim: false })
        .block(
            Block::bordered()
                .title(Line::from(" rv ".bold()).centered())
                .title_bottom(Line::from(" <Esc> close ").centered())
                .border_set(border::THICK),
        );
    frame.render_widget(Clear, area);
    frame.render_widget(popup, area);
}

fn centered_rect(r: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
