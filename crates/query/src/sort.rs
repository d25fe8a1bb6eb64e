// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::cmp::Ordering;

use rill_core::Value;

use crate::ir::{CompareOptions, Direction, LocaleOptions, NullsOrder, StringSort};

/// Compare two values under order-by options.
///
/// The nulls policy applies to the final output position, so it is not
/// flipped by a descending direction.
pub fn compare_values(a: &Value, b: &Value, options: &CompareOptions) -> Ordering {
	match (a.is_undefined(), b.is_undefined()) {
		(true, true) => return Ordering::Equal,
		(true, false) => {
			return match options.nulls {
				NullsOrder::First => Ordering::Less,
				NullsOrder::Last => Ordering::Greater,
			};
		}
		(false, true) => {
			return match options.nulls {
				NullsOrder::First => Ordering::Greater,
				NullsOrder::Last => Ordering::Less,
			};
		}
		(false, false) => {}
	}

	let base = match (a, b, &options.string_sort) {
		(Value::Text(l), Value::Text(r), StringSort::Locale(locale)) => locale_compare(l, r, locale),
		_ => a.cmp(b),
	};

	match options.direction {
		Direction::Asc => base,
		Direction::Desc => base.reverse(),
	}
}

/// Portable locale-ish comparison: optional case folding and numeric-aware
/// digit runs. No collation tables; the `locale` tag rides along for
/// adapters that translate the query elsewhere.
pub fn locale_compare(a: &str, b: &str, options: &LocaleOptions) -> Ordering {
	if options.numeric {
		return numeric_segments(a, b, options.case_insensitive);
	}
	if options.case_insensitive {
		let folded = a.to_lowercase().cmp(&b.to_lowercase());
		if folded != Ordering::Equal {
			return folded;
		}
	}
	a.cmp(b)
}

fn numeric_segments(a: &str, b: &str, case_insensitive: bool) -> Ordering {
	let mut left = a.chars().peekable();
	let mut right = b.chars().peekable();

	loop {
		match (left.peek().copied(), right.peek().copied()) {
			(None, None) => return Ordering::Equal,
			(None, Some(_)) => return Ordering::Less,
			(Some(_), None) => return Ordering::Greater,
			(Some(lc), Some(rc)) if lc.is_ascii_digit() && rc.is_ascii_digit() => {
				let lnum = take_digits(&mut left);
				let rnum = take_digits(&mut right);
				let ord = compare_digit_runs(&lnum, &rnum);
				if ord != Ordering::Equal {
					return ord;
				}
			}
			(Some(lc), Some(rc)) => {
				let (lc, rc) = if case_insensitive {
					(
						lc.to_lowercase().next().unwrap_or(lc),
						rc.to_lowercase().next().unwrap_or(rc),
					)
				} else {
					(lc, rc)
				};
				let ord = lc.cmp(&rc);
				if ord != Ordering::Equal {
					return ord;
				}
				left.next();
				right.next();
			}
		}
	}
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
	let mut run = String::new();
	while let Some(c) = chars.peek() {
		if c.is_ascii_digit() {
			run.push(*c);
			chars.next();
		} else {
			break;
		}
	}
	run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
	let a = a.trim_start_matches('0');
	let b = b.trim_start_matches('0');
	a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
	use std::cmp::Ordering;

	use rill_core::Value;

	use super::{compare_values, locale_compare};
	use crate::ir::{CompareOptions, Direction, LocaleOptions, NullsOrder};

	#[test]
	fn test_direction() {
		let asc = CompareOptions::default();
		let desc = CompareOptions::desc();
		assert_eq!(compare_values(&Value::Int(1), &Value::Int(2), &asc), Ordering::Less);
		assert_eq!(compare_values(&Value::Int(1), &Value::Int(2), &desc), Ordering::Greater);
	}

	#[test]
	fn test_nulls_policy_not_flipped_by_direction() {
		let desc_last = CompareOptions {
			direction: Direction::Desc,
			nulls: NullsOrder::Last,
			..Default::default()
		};
		assert_eq!(compare_values(&Value::Undefined, &Value::Int(1), &desc_last), Ordering::Greater);
		assert_eq!(compare_values(&Value::Int(1), &Value::Undefined, &desc_last), Ordering::Less);
	}

	#[test]
	fn test_numeric_locale_compare() {
		let options = LocaleOptions {
			numeric: true,
			..Default::default()
		};
		assert_eq!(locale_compare("a9", "a10", &options), Ordering::Less);
		assert_eq!(locale_compare("a010", "a10", &options), Ordering::Equal);
		assert_eq!(locale_compare("b2", "a10", &options), Ordering::Greater);
	}

	#[test]
	fn test_case_insensitive_compare() {
		let options = LocaleOptions {
			case_insensitive: true,
			..Default::default()
		};
		assert_eq!(locale_compare("Apple", "apple", &options), Ordering::Less);
		assert_eq!(locale_compare("APPLE", "banana", &options), Ordering::Less);
	}
}
