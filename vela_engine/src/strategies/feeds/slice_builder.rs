use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;

use crate::helpers::converters::time_convert_utc_to_fixed_offset;
use crate::standardized_types::base_data::base_data_enum::BaseDataEnum;
use crate::standardized_types::base_data::option_chain::OptionChain;
use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::base_data::universe::UniverseCollection;
use crate::standardized_types::securities::SecurityChanges;
use crate::standardized_types::subscriptions::Symbol;
use crate::standardized_types::time_slices::{SliceView, SubscriptionPacket, TimeSlice};

/// Assembles the immutable time slice for one frontier advance: groups the
/// packets' data into the per-type user view, extracts securities, cash book
/// and consolidator updates, and materialises option chains.
pub fn create_time_slice(
    frontier: DateTime<Utc>,
    algorithm_time_zone: Tz,
    cash_conversion_symbols: &[(String, Symbol)],
    packets: Vec<SubscriptionPacket>,
    security_changes: SecurityChanges,
) -> TimeSlice {
    let mut view = SliceView::default();
    let mut data_point_count = 0usize;
    let mut data = Vec::new();
    let mut securities_updates = Vec::new();
    let mut cash_book_updates = Vec::new();
    let mut consolidator_updates = Vec::new();
    let mut custom_data = Vec::new();

    for packet in &packets {
        let config = &packet.config;
        let mut custom_packet_data = Vec::new();
        let mut latest_price_datum: Option<BaseDataEnum> = None;

        for datum in &packet.data {
            match datum {
                BaseDataEnum::UniverseCollection(collection) => {
                    data_point_count += collection.data.len().max(1);
                    if collection.filtered_contracts.is_some() {
                        // an option filter result refreshes the canonical
                        // chain and is consumed here, no further routing
                        apply_filtered_contracts(&mut view, collection, frontier);
                        continue;
                    }
                    for inner in &collection.data {
                        process_datum(
                            inner,
                            packet,
                            frontier,
                            &mut view,
                            &mut data,
                            &mut securities_updates,
                            &mut consolidator_updates,
                            &mut latest_price_datum,
                        );
                    }
                }
                _ => {
                    data_point_count += 1;
                    process_datum(
                        datum,
                        packet,
                        frontier,
                        &mut view,
                        &mut data,
                        &mut securities_updates,
                        &mut consolidator_updates,
                        &mut latest_price_datum,
                    );
                }
            }
            if config.is_custom_data && !datum.is_auxiliary() {
                custom_packet_data.push(datum.clone());
            }
        }

        if !custom_packet_data.is_empty() {
            custom_data.push((config.clone(), custom_packet_data));
        }

        // the latest non-auxiliary datum refreshes every cash holding backed
        // by this packet's symbol
        if let Some(latest) = latest_price_datum {
            let backs_cash = cash_conversion_symbols
                .iter()
                .any(|(_, symbol)| symbol == &packet.symbol);
            if backs_cash {
                cash_book_updates.push(latest);
            }
        }
    }

    propagate_underlying_prices(&mut view);

    let local_time = time_convert_utc_to_fixed_offset(&algorithm_time_zone, frontier);
    TimeSlice {
        time: frontier,
        local_time,
        data_point_count,
        data,
        slice: view,
        securities_updates,
        cash_book_updates,
        consolidator_updates,
        custom_data,
        security_changes,
    }
}

#[allow(clippy::too_many_arguments)]
fn process_datum(
    datum: &BaseDataEnum,
    packet: &SubscriptionPacket,
    frontier: DateTime<Utc>,
    view: &mut SliceView,
    data: &mut Vec<BaseDataEnum>,
    securities_updates: &mut Vec<(Symbol, BaseDataEnum)>,
    consolidator_updates: &mut Vec<(std::sync::Arc<crate::standardized_types::subscriptions::SubscriptionConfig>, BaseDataEnum)>,
    latest_price_datum: &mut Option<BaseDataEnum>,
) {
    let config = &packet.config;
    if !config.is_internal_feed {
        data.push(datum.clone());
    }

    if datum.is_auxiliary() {
        route_auxiliary(view, datum);
        return;
    }
    if let BaseDataEnum::UniverseCollection(_) = datum {
        return;
    }

    let symbol = datum.symbol().clone();
    match datum {
        BaseDataEnum::Tick(tick) => {
            if symbol.option.is_some() {
                if let Some(chain) = chain_for(view, &symbol, frontier) {
                    chain.contract_mut(&symbol).update_with_tick(tick);
                }
            } else {
                view.ticks.entry(symbol.name.clone()).or_default().push(tick.clone());
            }
        }
        BaseDataEnum::TradeBar(bar) => {
            if symbol.option.is_some() {
                if let Some(chain) = chain_for(view, &symbol, frontier) {
                    chain.contract_mut(&symbol).update_with_trade_bar(bar);
                }
            } else {
                view.trade_bars.insert(symbol.name.clone(), bar.clone());
            }
        }
        BaseDataEnum::QuoteBar(bar) => {
            if symbol.option.is_some() {
                if let Some(chain) = chain_for(view, &symbol, frontier) {
                    chain.contract_mut(&symbol).update_with_quote_bar(bar);
                }
            } else {
                view.quote_bars.insert(symbol.name.clone(), bar.clone());
            }
        }
        _ => {}
    }

    securities_updates.push((symbol, datum.clone()));
    *latest_price_datum = Some(datum.clone());
    if !config.is_internal_feed {
        consolidator_updates.push((config.clone(), datum.clone()));
    }
}

fn route_auxiliary(view: &mut SliceView, datum: &BaseDataEnum) {
    match datum {
        BaseDataEnum::Split(split) => {
            view.splits.insert(split.symbol.name.clone(), split.clone());
        }
        BaseDataEnum::Dividend(dividend) => {
            view.dividends.insert(dividend.symbol.name.clone(), dividend.clone());
        }
        BaseDataEnum::Delisting(delisting) => {
            view.delistings.insert(delisting.symbol.name.clone(), delisting.clone());
        }
        BaseDataEnum::SymbolChanged(changed) => {
            view.symbol_changes.insert(changed.symbol.name.clone(), changed.clone());
        }
        _ => {}
    }
}

fn chain_for<'a>(view: &'a mut SliceView, contract_symbol: &Symbol, frontier: DateTime<Utc>) -> Option<&'a mut OptionChain> {
    let underlying = contract_symbol.underlying_symbol()?;
    let canonical = Symbol::canonical_option(&underlying.name, &underlying.market);
    Some(
        view.option_chains
            .entry(canonical.name.clone())
            .or_insert_with(|| OptionChain::new(underlying, frontier)),
    )
}

fn apply_filtered_contracts(view: &mut SliceView, collection: &UniverseCollection, frontier: DateTime<Utc>) {
    let filtered = match &collection.filtered_contracts {
        Some(filtered) => filtered.clone(),
        None => return,
    };
    let underlying = match filtered.first().and_then(|contract| contract.underlying_symbol()) {
        Some(underlying) => underlying,
        None => return,
    };
    let canonical = Symbol::canonical_option(&underlying.name, &underlying.market);
    let chain = view
        .option_chains
        .entry(canonical.name.clone())
        .or_insert_with(|| OptionChain::new(underlying, frontier));
    chain.filtered_contracts = filtered;
}

/// Copies the underlying's last price from this slice onto its chains and
/// their contracts.
fn propagate_underlying_prices(view: &mut SliceView) {
    let chain_names: Vec<String> = view.option_chains.keys().cloned().collect();
    for name in chain_names {
        let underlying_name = {
            let chain = &view.option_chains[&name];
            chain.underlying.name.clone()
        };
        let underlying_price = view
            .trade_bars
            .get(&underlying_name)
            .map(|bar| bar.close)
            .or_else(|| {
                view.ticks
                    .get(&underlying_name)
                    .and_then(|ticks| ticks.last())
                    .map(|tick| tick.price)
            })
            .or_else(|| view.quote_bars.get(&underlying_name).map(|bar| bar.close()));
        if let Some(price) = underlying_price {
            if price > Decimal::ZERO {
                if let Some(chain) = view.option_chains.get_mut(&name) {
                    chain.underlying_last_price = price;
                    for contract in chain.contracts.values_mut() {
                        contract.underlying_last_price = price;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standardized_types::base_data::auxiliary::Split;
    use crate::standardized_types::base_data::base_data_type::BaseDataType;
    use crate::standardized_types::base_data::tick::Tick;
    use crate::standardized_types::base_data::trade_bar::TradeBar;
    use crate::standardized_types::enums::{NormalizationMode, OptionRight, OptionStyle, SecurityType, TickKind};
    use crate::standardized_types::resolution::Resolution;
    use crate::standardized_types::subscriptions::{OptionContractSpec, SubscriptionConfig};
    use chrono::{NaiveDate, TimeZone};
    use chrono_tz::America::New_York;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn frontier() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 2, 14, 31, 0).unwrap()
    }

    fn equity_config(name: &str, internal: bool) -> Arc<SubscriptionConfig> {
        Arc::new(SubscriptionConfig::new(
            Symbol::new(name, SecurityType::Equity, "usa"),
            BaseDataType::TradeBars,
            Resolution::Minute,
            New_York,
            New_York,
            false,
            false,
            false,
            internal,
            true,
            TickKind::Trade,
            NormalizationMode::Raw,
        ))
    }

    fn bar(name: &str, close: rust_decimal::Decimal) -> BaseDataEnum {
        BaseDataEnum::TradeBar(TradeBar::new(
            Symbol::new(name, SecurityType::Equity, "usa"),
            close,
            close,
            close,
            close,
            dec!(100),
            Utc.with_ymd_and_hms(2020, 1, 2, 14, 30, 0).unwrap(),
            Resolution::Minute,
        ))
    }

    #[test]
    fn groups_data_by_type_and_symbol() {
        let config = equity_config("FOO", false);
        let split = BaseDataEnum::Split(Split {
            symbol: Symbol::new("FOO", SecurityType::Equity, "usa"),
            time: frontier(),
            reference_price: dec!(100),
            split_factor: dec!(0.5),
        });
        let packet = SubscriptionPacket {
            symbol: config.symbol.clone(),
            config: config.clone(),
            data: vec![bar("FOO", dec!(100)), split],
        };
        let slice = create_time_slice(frontier(), New_York, &[], vec![packet], SecurityChanges::none());
        assert_eq!(slice.data_point_count, 2);
        assert_eq!(slice.slice.trade_bars["FOO"].close, dec!(100));
        assert_eq!(slice.slice.splits["FOO"].split_factor, dec!(0.5));
        assert_eq!(slice.securities_updates.len(), 1);
        assert_eq!(slice.consolidator_updates.len(), 1);
        assert_eq!(slice.data.len(), 2);
        // the algorithm local time is the frontier in its own zone
        assert_eq!(slice.local_time.naive_local().time().to_string(), "09:31:00");
    }

    #[test]
    fn internal_feeds_update_securities_but_stay_hidden() {
        let config = equity_config("FOO", true);
        let packet = SubscriptionPacket {
            symbol: config.symbol.clone(),
            config: config.clone(),
            data: vec![bar("FOO", dec!(100))],
        };
        let slice = create_time_slice(frontier(), New_York, &[], vec![packet], SecurityChanges::none());
        assert!(slice.data.is_empty());
        assert!(slice.consolidator_updates.is_empty());
        assert_eq!(slice.securities_updates.len(), 1);
    }

    #[test]
    fn cash_conversion_symbols_produce_updates() {
        let config = equity_config("USDJPY", false);
        let packet = SubscriptionPacket {
            symbol: config.symbol.clone(),
            config: config.clone(),
            data: vec![bar("USDJPY", dec!(150)), bar("USDJPY", dec!(151))],
        };
        let conversions = vec![("JPY".to_string(), config.symbol.clone())];
        let slice = create_time_slice(frontier(), New_York, &conversions, vec![packet], SecurityChanges::none());
        assert_eq!(slice.cash_book_updates.len(), 1);
        assert_eq!(slice.cash_book_updates[0].value(), dec!(151));
    }

    #[test]
    fn option_data_materialises_the_chain() {
        let spec = OptionContractSpec {
            underlying: "FOO".to_string(),
            style: OptionStyle::American,
            right: OptionRight::Call,
            strike: dec!(100),
            expiry: NaiveDate::from_ymd_opt(2020, 6, 19).unwrap(),
        };
        let contract_symbol = Symbol::option_contract("usa", spec);
        let option_config = Arc::new(SubscriptionConfig::new(
            contract_symbol.clone(),
            BaseDataType::Ticks,
            Resolution::Tick,
            New_York,
            New_York,
            false,
            false,
            false,
            false,
            true,
            TickKind::Quote,
            NormalizationMode::Raw,
        ));
        let quote = BaseDataEnum::Tick(Tick::quote(
            contract_symbol.clone(),
            dec!(4.90),
            dec!(10),
            dec!(5.10),
            dec!(12),
            "Q".to_string(),
            false,
            frontier(),
        ));
        let option_packet = SubscriptionPacket {
            symbol: contract_symbol.clone(),
            config: option_config,
            data: vec![quote],
        };
        let equity = equity_config("FOO", false);
        let equity_packet = SubscriptionPacket {
            symbol: equity.symbol.clone(),
            config: equity.clone(),
            data: vec![bar("FOO", dec!(101))],
        };
        let slice = create_time_slice(
            frontier(),
            New_York,
            &[],
            vec![option_packet, equity_packet],
            SecurityChanges::none(),
        );
        let chain = &slice.slice.option_chains["?FOO"];
        assert_eq!(chain.underlying_last_price, dec!(101));
        let contract = chain.contracts.values().next().unwrap();
        assert_eq!(contract.bid_price, dec!(4.90));
        assert_eq!(contract.ask_size, dec!(12));
        assert_eq!(contract.underlying_last_price, dec!(101));
    }
}
