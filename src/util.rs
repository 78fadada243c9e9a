use std::net::{IpAddr, Ipv4Addr};

const API_PORT: &str = "BREWWATCH_API_PORT";

const DEFAULT_API_PORT: u16 = 8080;

pub fn get_api_port() -> u16 {
    let port_from_env = std::env::var(API_PORT);
    port_from_env.map_or(DEFAULT_API_PORT, |res| res.parse().unwrap_or(DEFAULT_API_PORT))
}

const API_ADDR: &str = "BREWWATCH_API_ADDR";

const DEFAULT_API_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0));

pub fn get_api_addr() -> IpAddr {
    let addr_from_env = std::env::var(API_ADDR);
    addr_from_env.map_or(DEFAULT_API_ADDR, |res| res.parse().unwrap_or(DEFAULT_API_ADDR))
}
