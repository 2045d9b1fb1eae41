use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("i", Style::default().fg(Color::Magenta)),
            Span::raw("           Edit image path"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("e", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("/", Style::default().fg(Color::Magenta)),
            Span::raw("       Edit question"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("1-5", Style::default().fg(Color::Magenta)),
            Span::raw("         Use an example question"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("Enter", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("s", Style::default().fg(Color::Magenta)),
            Span::raw("   Submit the query"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("c", Style::default().fg(Color::Magenta)),
            Span::raw("           Cancel the in-flight query"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("x", Style::default().fg(Color::Magenta)),
            Span::raw("           Reset inputs and result"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("y", Style::default().fg(Color::Magenta)),
            Span::raw("           Copy the answer to clipboard"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("tab", Style::default().fg(Color::Magenta)),
            Span::raw("         Switch tabs"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("?", Style::default().fg(Color::Magenta)),
            Span::raw("           Show this help"),
        ]),
        Line::from(""),
        Line::from("While editing a field:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("Esc", Style::default().fg(Color::Magenta)),
            Span::raw("         Leave the field"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("Enter", Style::default().fg(Color::Magenta)),
            Span::raw("       Confirm (submits from the question field)"),
        ]),
        Line::from(""),
        Line::from("Questions are limited to 240 characters; images to 10MB."),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
