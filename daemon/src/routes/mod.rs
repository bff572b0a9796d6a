pub mod allocation;
pub mod funding;
pub mod orders;
pub mod webhooks;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(funding::deposit_address)
        .service(funding::balances)
        .service(funding::confirmations)
        .service(orders::create_order)
        .service(allocation::enable)
        .service(allocation::pause)
        .service(allocation::resume)
        .service(allocation::status)
        .service(allocation::allocation_balances)
        .service(webhooks::chain_deposit)
        .service(webhooks::due)
        .service(webhooks::grid);
}
