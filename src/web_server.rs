use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::ServerConfig;
use crate::engine::ExecutionEngine;
use crate::routes::{execute_handler, json_error_handler, languages_handler};

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_BIND_PORT: u16 = 12345;

/// Registers every route and shared state on an actix `App`
pub fn configure(engine: web::Data<ExecutionEngine>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(engine)
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(execute_handler)
            .service(languages_handler);
    }
}

pub fn build_server(server_config: ServerConfig, engine: ExecutionEngine) -> std::io::Result<Server> {
    let engine = web::Data::new(engine);

    let server = HttpServer::new(move || {
        App::new()
            .configure(configure(engine.clone()))
            .wrap(middleware::Logger::default())
    })
    .bind((
        server_config
            .bind_address
            .unwrap_or(DEFAULT_BIND_ADDRESS.to_string()),
        server_config.bind_port.unwrap_or(DEFAULT_BIND_PORT),
    ))?
    .run();

    Ok(server)
}
