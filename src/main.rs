//! XJP Edge Provisioner - 边缘节点开通工具
//!
//! Usage:
//! - `xjp-edge-provisioner <subdomain> <api-token>`
//!
//! 成功退出码为 0；任一步骤致命失败退出码为 1，失败步骤见日志。

/// 解析命令行参数（两个位置参数）
fn parse_args() -> (String, String) {
    let args: Vec<String> = std::env::args().collect();

    let mut positionals = Vec::new();
    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => positionals.push(arg.clone()),
        }
    }

    if positionals.len() != 2 {
        print_help();
        std::process::exit(1);
    }

    (positionals[0].clone(), positionals[1].clone())
}

fn print_help() {
    println!("XJP Edge Provisioner - 边缘节点开通工具");
    println!();
    println!("USAGE:");
    println!("    xjp-edge-provisioner <SUBDOMAIN> <API_TOKEN>");
    println!();
    println!("ARGS:");
    println!("    <SUBDOMAIN>    Subdomain to provision ([a-zA-Z0-9-]+)");
    println!("    <API_TOKEN>    DNS provider API token");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help     Print help information");
    println!();
    println!("EXAMPLES:");
    println!("    xjp-edge-provisioner node-01 cf_xxxxxxxxxxxx");
}

fn main() {
    let (subdomain, api_token) = parse_args();

    xjp_edge_provisioner::init_logging();

    let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let result = rt.block_on(xjp_edge_provisioner::run(&subdomain, &api_token));

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
