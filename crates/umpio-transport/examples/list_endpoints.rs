use umpio_transport::UmpTransport;

fn main() -> umpio_transport::Result<()> {
    tracing_subscriber::fmt::init();

    let transport = UmpTransport::builder().client_name("list-endpoints").build()?;
    let caps = transport.capabilities();
    println!(
        "Platform: {:?} (MIDI 2.0: {}, max SysEx: {} bytes)",
        caps.platform, caps.midi2_support, caps.max_payload
    );

    println!("\n=== UMP Inputs ===");
    let inputs = transport.list_inputs();
    if inputs.is_empty() {
        println!("  (none found)");
    }
    for endpoint in &inputs {
        println!("  [{}] {}", endpoint.index, endpoint.name);
    }

    println!("\n=== UMP Outputs ===");
    let outputs = transport.list_outputs();
    if outputs.is_empty() {
        println!("  (none found)");
    }
    for endpoint in &outputs {
        println!("  [{}] {}", endpoint.index, endpoint.name);
    }

    transport.shutdown()
}
