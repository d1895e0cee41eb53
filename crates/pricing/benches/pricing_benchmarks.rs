use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use inflow_core::Currency;
use inflow_pricing::{
    BulkPricingInput, CartItem, MilestonePaymentTypes, MilestonePlan, PaymentType, PricingEngine,
    Quotation, QuotationKind, SamplePricingInput,
};

fn cart(lines: usize) -> Vec<CartItem> {
    (0..lines)
        .map(|i| {
            // Every other line falls back to the quoted price.
            let unit_price = if i % 2 == 0 { dec!(12.35) } else { Decimal::ZERO };
            CartItem::new("M", format!("color-{i}"), 50 + i as i64, unit_price)
        })
        .collect()
}

fn quotations() -> Vec<Quotation> {
    [(QuotationKind::Sample, dec!(20)), (QuotationKind::Bulk, dec!(11.80))]
        .into_iter()
        .map(|(kind, price)| Quotation {
            kind,
            price,
            lead_time_days: 30,
            accepted: true,
        })
        .collect()
}

fn bench_sample_pricing(c: &mut Criterion) {
    let engine = PricingEngine::new();
    let items = cart(4);
    let quotations = quotations();

    c.bench_function("price_sample_card", |b| {
        b.iter(|| {
            let input = SamplePricingInput {
                currency: Currency::Usd,
                items: &items,
                quotations: &quotations,
                tax_percentage: dec!(8),
                shipping_fee: dec!(25),
                payment_type: PaymentType::Card,
            };
            black_box(engine.price_sample(black_box(&input)).unwrap());
        });
    });
}

fn bench_bulk_pricing(c: &mut Criterion) {
    let mut group = c.benchmark_group("price_bulk");
    let engine = PricingEngine::new();
    let quotations = quotations();
    let plan = MilestonePlan::new(30, 20).unwrap();
    let payment_types = MilestonePaymentTypes {
        first: PaymentType::Card,
        second: PaymentType::BankTransfer,
        final_: PaymentType::Card,
    };

    for lines in [1usize, 10, 100, 1000] {
        let items = cart(lines);
        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::new("lines", lines), &items, |b, items| {
            b.iter(|| {
                let input = BulkPricingInput {
                    currency: Currency::Usd,
                    items,
                    quotations: &quotations,
                    tax_percentage: dec!(10),
                    shipping_fee: dec!(120),
                    plan,
                    payment_types,
                    commercial_invoice: None,
                    additional_items: &[],
                    deposit: dec!(100),
                    sample_deduction: dec!(40),
                };
                black_box(engine.price_bulk(black_box(&input)).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sample_pricing, bench_bulk_pricing);
criterion_main!(benches);
