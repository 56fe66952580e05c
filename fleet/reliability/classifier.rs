use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Category, Order};

static TYPE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ZF0([1-3])").expect("type code regex"));

/// Status words meaning the order was closed, already accent-folded and lowercased.
const CLOSED_KEYWORDS: [&str; 4] = ["closed", "fechada", "concluida", "finalizada"];

/// Maps the raw type text of an order to its category.
#[must_use]
pub fn classify(order: &Order) -> Category {
    classify_type(&order.order_type)
}

/// Extracts the first `ZF01`/`ZF02`/`ZF03` token, case-insensitively.
#[must_use]
pub fn classify_type(raw: &str) -> Category {
    TYPE_CODE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map_or(Category::Unknown, |digit| match digit.as_str() {
            "1" => Category::Zf01,
            "2" => Category::Zf02,
            _ => Category::Zf03,
        })
}

/// An order is open when it has no valid end and no closed status keyword.
#[must_use]
pub fn is_open(order: &Order) -> bool {
    order.valid_end().is_none() && !order.status.as_deref().is_some_and(is_closed_status)
}

/// Whether a status text carries one of the closed keywords.
#[must_use]
pub fn is_closed_status(status: &str) -> bool {
    let folded = fold_accents(status);
    CLOSED_KEYWORDS
        .iter()
        .any(|keyword| folded.contains(keyword))
}

/// Whether the order belongs in downtime accounting.
///
/// Corrective orders always count, whatever their stop flag says. Every other
/// category counts only when it stopped the vehicle.
#[must_use]
pub fn counts_for_downtime(order: &Order) -> bool {
    classify(order) == Category::Zf02 || order.has_stop
}

/// Lowercases and strips the Portuguese diacritics found in status texts.
#[must_use]
pub fn fold_accents(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn order(order_type: &str) -> Order {
        Order::new(
            "OS-1",
            "CAM-1",
            order_type,
            Utc.with_ymd_and_hms(2025, 10, 3, 8, 0, 0).unwrap(),
        )
    }

    #[test]
    fn extracts_type_codes() {
        assert_eq!(classify_type("ZF02"), Category::Zf02);
        assert_eq!(classify_type("Ordem zf01 - melhoria"), Category::Zf01);
        assert_eq!(classify_type("tipo:Zf03"), Category::Zf03);
        assert_eq!(classify_type("ZF04"), Category::Unknown);
        assert_eq!(classify_type(""), Category::Unknown);
        assert_eq!(classify_type("corretiva"), Category::Unknown);
    }

    #[test]
    fn open_without_end_or_closed_status() {
        let open = order("ZF02");
        assert!(is_open(&open));
        let closed_by_status = order("ZF02").with_status("Concluída");
        assert!(!is_open(&closed_by_status));
        let closed_by_end = order("ZF02").with_end(open.start + chrono::Duration::hours(2));
        assert!(!is_open(&closed_by_end));
    }

    #[test]
    fn end_before_start_keeps_order_open() {
        let inverted = order("ZF03").with_end(Utc.with_ymd_and_hms(2025, 10, 2, 8, 0, 0).unwrap());
        assert!(is_open(&inverted));
    }

    #[test]
    fn end_equal_to_start_keeps_order_open() {
        let instant = order("ZF02");
        let zero_length = order("ZF02").with_end(instant.start);
        assert_eq!(zero_length.valid_end(), None);
        assert!(is_open(&zero_length));
        assert!(!is_open(&zero_length.with_status("Fechada")));
    }

    #[test]
    fn closed_status_is_accent_and_case_insensitive() {
        for status in ["FECHADA", "Concluida", "concluída", "Finalizada em 03/10", "closed"] {
            assert!(is_closed_status(status), "{status}");
        }
        assert!(!is_closed_status("Em andamento"));
        assert!(!is_closed_status("Aberta"));
    }

    #[test]
    fn corrective_orders_ignore_stop_flag() {
        assert!(counts_for_downtime(&order("ZF02").with_stop(false)));
        assert!(!counts_for_downtime(&order("ZF03").with_stop(false)));
        assert!(counts_for_downtime(&order("ZF03")));
        assert!(counts_for_downtime(&order("ZF01").with_stop(true)));
        assert!(!counts_for_downtime(&order("sem tipo").with_stop(false)));
    }
}
