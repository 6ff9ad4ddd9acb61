//! Receipt
//!
//! Console rendering of a recalculated order.

use std::{fmt::Write, io};

use rusty_money::{Money, MoneyError, iso::Currency};
use smallvec::SmallVec;
use tabled::{
    builder::Builder,
    grid::config::HorizontalLine,
    settings::{
        Alignment, Color, Style, Theme,
        object::{Columns, Rows},
    },
};
use thiserror::Error;

use crate::{
    money::{TaxedMoney, percent_points},
    order::{Order, OrderLine},
};

/// Errors that can occur when writing a receipt.
#[derive(Debug, Error)]
pub enum ReceiptError {
    /// Wrapper for money errors.
    #[error(transparent)]
    Money(#[from] MoneyError),

    /// IO error
    #[error("IO error")]
    IO,
}

/// Price summary of an order and its lines.
#[derive(Debug, Clone, Copy)]
pub struct Receipt<'r, 'a> {
    order: &'r Order<'a>,
    lines: &'r [OrderLine<'a>],
}

impl<'r, 'a> Receipt<'r, 'a> {
    /// Create a receipt for an order.
    pub fn new(order: &'r Order<'a>, lines: &'r [OrderLine<'a>]) -> Self {
        Self { order, lines }
    }

    /// Gross total before any discount minus the gross total paid.
    ///
    /// # Errors
    ///
    /// Returns a [`MoneyError`] if the totals use different currencies.
    pub fn savings(&self) -> Result<Money<'a, Currency>, MoneyError> {
        self.order.undiscounted_total.gross.sub(self.order.total.gross)
    }

    /// Write the line table and the order summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the receipt cannot be written.
    pub fn write_to(&self, mut out: impl io::Write) -> Result<(), ReceiptError> {
        let mut builder = Builder::default();
        let mut color_ops: SmallVec<[(usize, usize, Color); 32]> = SmallVec::new();

        push_receipt_header(&mut builder);

        for (idx, line) in self.lines.iter().enumerate() {
            append_line_row(&mut builder, &mut color_ops, idx + 1, line)?;
        }

        write_receipt_table(&mut out, builder, color_ops)?;

        write_receipt_summary(&mut out, self)
    }
}

fn push_receipt_header(builder: &mut Builder) {
    builder.push_record([
        "",
        "Item",
        "Qty",
        "Base Price",
        "Unit Net",
        "Unit Gross",
        "Total Gross",
        "Tax",
        "Discount",
    ]);
}

fn append_line_row(
    builder: &mut Builder,
    color_ops: &mut SmallVec<[(usize, usize, Color); 32]>,
    row: usize,
    line: &OrderLine<'_>,
) -> Result<(), ReceiptError> {
    let tax_points = percent_points(line.tax_rate).ok_or(MoneyError::Overflow)?;

    let name = if line.is_gift {
        format!("{} (gift)", line.product_name)
    } else {
        line.product_name.clone()
    };

    builder.push_record([
        format!("#{row:<3}"),
        name,
        line.quantity.to_string(),
        format!("{}", line.undiscounted_base_unit_price),
        format!("{}", line.unit_price.net),
        format!("{}", line.unit_price.gross),
        format!("{}", line.total_price.gross),
        format!("{tax_points:.2}%"),
        line.unit_discount_reason.clone().unwrap_or_default(),
    ]);

    color_ops.push((row, 3, color_dark_grey()));

    if line.unit_discount_amount.amount().is_sign_positive()
        && !line.unit_discount_amount.amount().is_zero()
    {
        color_ops.push((row, 5, color_dark_green()));
    }

    Ok(())
}

fn write_receipt_table(
    out: &mut impl io::Write,
    builder: Builder,
    color_ops: SmallVec<[(usize, usize, Color); 32]>,
) -> Result<(), ReceiptError> {
    let mut table = builder.build();
    let mut theme = Theme::from(Style::modern_rounded());
    let separator = HorizontalLine::new(Some('─'), Some('┼'), Some('├'), Some('┤'));

    theme.remove_horizontal_lines();
    theme.insert_horizontal_line(1, separator);

    table.with(theme);
    table.modify(Rows::first(), Color::BOLD);
    table.modify(Columns::new(2..8), Alignment::right());

    for (row, col, color) in color_ops {
        table.modify((row, col), color);
    }

    let table_str = colorize_borders(&table.to_string());

    writeln!(out, "\n{table_str}").map_err(|_err| ReceiptError::IO)
}

fn write_receipt_summary(
    out: &mut impl io::Write,
    receipt: &Receipt<'_, '_>,
) -> Result<(), ReceiptError> {
    let order = receipt.order;
    let savings = receipt.savings()?;

    let rows = [
        (" Subtotal:", taxed_display(&order.subtotal)),
        (" Shipping:", taxed_display(&order.shipping_price)),
        (" Tax:", format!("{}  ", order.total.tax()?)),
        (" \x1b[1mTotal:\x1b[0m", format!("\x1b[1m{}\x1b[0m  ", order.total.gross)),
        (" Savings:", format!("{savings}  ")),
    ];

    let label_width = rows
        .iter()
        .map(|(label, _)| visible_width(label))
        .max()
        .unwrap_or_default();

    let value_width = rows
        .iter()
        .map(|(_, value)| visible_width(value))
        .max()
        .unwrap_or_default();

    for (label, value) in &rows {
        write_summary_line(out, label, value, label_width, value_width)?;
    }

    if let Some(error) = &order.tax_error {
        writeln!(out, "\n \x1b[31mTax error:\x1b[0m {error}").map_err(|_err| ReceiptError::IO)?;
    }

    writeln!(out).map_err(|_err| ReceiptError::IO)
}

fn taxed_display(price: &TaxedMoney<'_>) -> String {
    format!("{} net / {} gross  ", price.net, price.gross)
}

/// Wraps runs of UTF-8 box-drawing characters in ANSI dark-grey escape codes.
fn colorize_borders(table: &str) -> String {
    let mut out = String::with_capacity(table.len() + 256);
    let mut in_run = false;

    for ch in table.chars() {
        let box_char = ('\u{2500}'..='\u{257F}').contains(&ch);

        if box_char && !in_run {
            _ = out.write_str("\x1b[90m");
            in_run = true;
        } else if !box_char && in_run {
            _ = out.write_str("\x1b[0m");
            in_run = false;
        }

        out.push(ch);
    }

    if in_run {
        _ = out.write_str("\x1b[0m");
    }

    out
}

/// Returns the visible (non-ANSI) width of a string.
fn visible_width(s: &str) -> usize {
    let mut width = 0usize;
    let mut in_escape = false;

    for ch in s.chars() {
        if in_escape {
            if ch.is_ascii_alphabetic() {
                in_escape = false;
            }
        } else if ch == '\x1b' {
            in_escape = true;
        } else {
            width += 1;
        }
    }

    width
}

fn write_summary_line(
    out: &mut impl io::Write,
    label: &str,
    value: &str,
    label_col_width: usize,
    value_col_width: usize,
) -> Result<(), ReceiptError> {
    let label_pad = label_col_width.saturating_sub(visible_width(label));
    let value_pad = value_col_width.saturating_sub(visible_width(value));

    writeln!(
        out,
        "{:>label_pad$}{label}  {value_pad}{value}",
        "",
        value_pad = " ".repeat(value_pad)
    )
    .map_err(|_err| ReceiptError::IO)
}

/// ANSI dark grey foreground.
fn color_dark_grey() -> Color {
    Color::new("\x1b[90m", "\x1b[0m")
}

/// ANSI dark green (discounted price).
fn color_dark_green() -> Color {
    Color::new("\x1b[32m", "\x1b[0m")
}
